use std::iter::FusedIterator;

use log::{debug, info};
use phf::phf_map;

use crate::error::{LoxError, Result};
use crate::token::{Token, TokenType};

static KEYWORDS: phf::Map<&'static [u8], TokenType> = phf_map! {
    b"and" => TokenType::AND,
    b"break" => TokenType::BREAK,
    b"class" => TokenType::CLASS,
    b"else" => TokenType::ELSE,
    b"false" => TokenType::FALSE,
    b"fun" => TokenType::FUN,
    b"for" => TokenType::FOR,
    b"if" => TokenType::IF,
    b"nil" => TokenType::NIL,
    b"or" => TokenType::OR,
    b"print" => TokenType::PRINT,
    b"return" => TokenType::RETURN,
    b"super" => TokenType::SUPER,
    b"this" => TokenType::THIS,
    b"true" => TokenType::TRUE,
    b"var" => TokenType::VAR,
    b"while" => TokenType::WHILE,
};

/// Byte-cursor tokenizer, consumed as an iterator over `Result<Token>`.
///
/// The stream ends with exactly one `EOF` token; scan errors are yielded
/// in-stream and scanning continues afterwards, so the parser always sees a
/// best-effort token sequence.
///
/// `line` and `in_block_comment` survive the end of input: the REPL carries
/// them into [`Scanner::with_state`] for the next prompt line, so a `/* ...`
/// left open on one line keeps consuming on the next.
#[derive(Debug, Clone)]
pub struct Scanner {
    source: Vec<u8>,
    start: usize,
    current: usize,
    line: usize,
    in_block_comment: bool,
    pending_token: Option<TokenType>,
}

impl Scanner {
    pub fn new<B: Into<Vec<u8>>>(buf: B) -> Self {
        Self::with_state(buf, 1, false)
    }

    /// Resume scanning with carried-over line number and block-comment state.
    pub fn with_state<B: Into<Vec<u8>>>(buf: B, line: usize, in_block_comment: bool) -> Self {
        let source = buf.into();
        info!(
            "Initializing Scanner with buffer of {} bytes at line {}",
            source.len(),
            line
        );
        Self {
            source,
            start: 0,
            current: 0,
            line,
            in_block_comment,
            pending_token: None,
        }
    }

    /// Current 1-based line number.
    #[inline]
    pub fn line(&self) -> usize {
        self.line
    }

    /// True while an unterminated `/* ... */` spans past the end of input.
    #[inline]
    pub fn in_block_comment(&self) -> bool {
        self.in_block_comment
    }

    fn scan_token(&mut self) -> Result<()> {
        let byte: u8 = self.advance();

        match byte {
            b'(' => self.add_token(TokenType::LEFT_PAREN),

            b')' => self.add_token(TokenType::RIGHT_PAREN),

            b'{' => self.add_token(TokenType::LEFT_BRACE),

            b'}' => self.add_token(TokenType::RIGHT_BRACE),

            b',' => self.add_token(TokenType::COMMA),

            b'.' => self.add_token(TokenType::DOT),

            b'-' => self.add_token(TokenType::MINUS),

            b'+' => self.add_token(TokenType::PLUS),

            b';' => self.add_token(TokenType::SEMICOLON),

            b'*' => self.add_token(TokenType::STAR),

            b'!' => {
                let token_type: TokenType = if self.match_byte(b'=') {
                    TokenType::BANG_EQUAL
                } else {
                    TokenType::BANG
                };
                self.add_token(token_type);
            }

            b'=' => {
                let token_type: TokenType = if self.match_byte(b'=') {
                    TokenType::EQUAL_EQUAL
                } else {
                    TokenType::EQUAL
                };
                self.add_token(token_type);
            }

            b'<' => {
                let token_type: TokenType = if self.match_byte(b'=') {
                    TokenType::LESS_EQUAL
                } else {
                    TokenType::LESS
                };
                self.add_token(token_type);
            }

            b'>' => {
                let token_type: TokenType = if self.match_byte(b'=') {
                    TokenType::GREATER_EQUAL
                } else {
                    TokenType::GREATER
                };
                self.add_token(token_type);
            }

            b' ' | b'\r' | b'\t' => {}

            b'\n' => {
                self.line += 1;
            }

            b'/' => {
                if self.match_byte(b'/') {
                    debug!("Found line comment, skipping until newline");
                    while self.peek() != b'\n' && !self.is_at_end() {
                        self.advance();
                    }
                } else if self.match_byte(b'*') {
                    debug!("Entering block comment at line {}", self.line);
                    self.in_block_comment = true;
                    self.skip_block_comment();
                } else {
                    self.add_token(TokenType::SLASH);
                }
            }

            b'"' => {
                self.parse_string()?;
            }

            b'0'..=b'9' => {
                self.parse_number();
            }

            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                self.parse_identifier();
            }

            _ => {
                debug!(
                    "Unexpected character '{}' at line {}",
                    byte as char, self.line
                );

                return Err(LoxError::lex(self.line, "Unexpected character."));
            }
        }

        Ok(())
    }

    /// Consume until `*/` or end of input. Block comments do not nest.
    fn skip_block_comment(&mut self) {
        while !self.is_at_end() {
            if self.peek() == b'*' && self.peek_next() == b'/' {
                self.advance();
                self.advance();
                self.in_block_comment = false;
                debug!("Block comment closed at line {}", self.line);
                return;
            }

            if self.peek() == b'\n' {
                self.line += 1;
            }
            self.advance();
        }
    }

    fn parse_string(&mut self) -> Result<()> {
        while !self.is_at_end() && self.peek() != b'"' {
            if self.peek() == b'\n' {
                self.line += 1;
            }
            self.advance();
        }

        if self.is_at_end() {
            return Err(LoxError::lex(self.line, "Unterminated string."));
        }

        // The closing quote.
        self.advance();

        let literal: String =
            String::from_utf8_lossy(&self.source[self.start + 1..self.current - 1]).into_owned();

        self.add_token(TokenType::STRING(literal));

        Ok(())
    }

    fn parse_number(&mut self) {
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        if self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            self.advance();

            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        let lexeme = String::from_utf8_lossy(&self.source[self.start..self.current]).into_owned();
        let number: f64 = lexeme.parse().unwrap_or(0.0);

        self.add_token(TokenType::NUMBER(number));
    }

    fn parse_identifier(&mut self) {
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
            self.advance();
        }

        let text = &self.source[self.start..self.current];

        match KEYWORDS.get(text) {
            Some(token_type) => self.add_token(token_type.clone()),
            None => self.add_token(TokenType::IDENTIFIER),
        }
    }

    #[inline]
    fn add_token(&mut self, token_type: TokenType) {
        self.pending_token = Some(token_type);
    }

    #[inline]
    fn advance(&mut self) -> u8 {
        let byte = self.source[self.current];
        self.current += 1;
        byte
    }

    #[inline]
    fn match_byte(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.source[self.current] != expected {
            false
        } else {
            self.current += 1;
            true
        }
    }

    #[inline]
    fn peek(&self) -> u8 {
        if self.is_at_end() {
            0
        } else {
            self.source[self.current]
        }
    }

    #[inline]
    fn peek_next(&self) -> u8 {
        if self.current + 1 >= self.source.len() {
            0
        } else {
            self.source[self.current + 1]
        }
    }

    #[inline]
    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }
}

impl Iterator for Scanner {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.in_block_comment {
                self.skip_block_comment();
            }

            if self.is_at_end() {
                if self.current == self.source.len() {
                    self.current += 1;

                    info!("Reached EOF at line {}", self.line);

                    return Some(Ok(Token::new(TokenType::EOF, String::new(), self.line)));
                }

                return None;
            }

            self.pending_token = None;
            self.start = self.current;

            if let Err(e) = self.scan_token() {
                return Some(Err(e));
            }

            if let Some(token_type) = self.pending_token.take() {
                let lexeme =
                    String::from_utf8_lossy(&self.source[self.start..self.current]).into_owned();

                let token = Token::new(token_type, lexeme, self.line);
                debug!("Emitting token: {} at line {}", token, token.line);

                return Some(Ok(token));
            }

            // Whitespace or a comment: keep scanning.
        }
    }
}

impl FusedIterator for Scanner {}
