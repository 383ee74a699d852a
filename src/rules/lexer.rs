//! Lexer for the security-rules DSL
//!
//! Produces a token stream with line/column/offset positions. Path literals
//! are recognized by context: a `/` starts a path when the previous token
//! cannot end an operand, and is division otherwise (the same trick
//! JavaScript lexers use for regex literals). Interpolations `$(expr)` and
//! literal `(...)` segments inside a path are consumed with balanced
//! parenthesis tracking; the parser re-lexes interpolation bodies.

//=============================================================================
// Tokens
//=============================================================================

/// Position of a token or AST node in the source text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePos {
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
    /// 0-based byte-independent character offset
    pub offset: u32,
}

impl SourcePos {
    pub fn start() -> Self {
        Self { line: 1, column: 1, offset: 0 }
    }
}

impl std::fmt::Display for SourcePos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// A lexer or parser problem with its source position
#[derive(Debug, Clone, PartialEq)]
pub struct RulesIssue {
    pub message: String,
    pub pos: SourcePos,
}

impl RulesIssue {
    pub fn new(message: impl Into<String>, pos: SourcePos) -> Self {
        Self { message: message.into(), pos }
    }
}

impl std::fmt::Display for RulesIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.message, self.pos)
    }
}

/// Token types for the rules lexer
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    RulesVersion,
    Service,
    Match,
    Allow,
    If,
    Function,
    Return,
    True,
    False,
    Null,
    In,
    Is,

    // Literals
    Identifier(String),
    Number(String),
    StringLiteral(String),
    /// Raw path text including the leading `/`
    PathLiteral(String),

    // Operators
    EqEq,      // ==
    NotEq,     // !=
    Less,      // <
    LessEq,    // <=
    Greater,   // >
    GreaterEq, // >=
    AndAnd,    // &&
    OrOr,      // ||
    Bang,      // !
    Plus,      // +
    Minus,     // -
    Star,      // *
    Slash,     // /
    Percent,   // %
    Assign,    // =

    // Punctuation
    Semicolon,
    Colon,
    Comma,
    Dot,
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Dollar,

    // End of input
    Eof,
}

/// A token with its source position
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub pos: SourcePos,
}

//=============================================================================
// Lexer
//=============================================================================

/// Lexer state
pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    /// Last significant token, for the path-vs-division decision
    last_token: Option<Token>,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            last_token: None,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn peek_ahead(&self, n: usize) -> Option<char> {
        self.input.get(self.pos + n).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn here(&self) -> SourcePos {
        SourcePos {
            line: self.line,
            column: self.column,
            offset: self.pos as u32,
        }
    }

    fn issue(&self, message: impl Into<String>) -> RulesIssue {
        RulesIssue::new(message, self.here())
    }

    fn skip_whitespace(&mut self) -> Result<(), RulesIssue> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_ahead(1) == Some('/') => {
                    // Line comment
                    while let Some(c) = self.advance() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some('/') if self.peek_ahead(1) == Some('*') => {
                    // Block comment
                    let start = self.here();
                    self.advance();
                    self.advance();
                    loop {
                        match self.advance() {
                            Some('*') if self.peek() == Some('/') => {
                                self.advance();
                                break;
                            }
                            Some(_) => {}
                            None => {
                                return Err(RulesIssue::new("Unterminated block comment", start))
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Whether a `/` here starts a path literal rather than division
    fn at_path_position(&self) -> bool {
        !matches!(
            self.last_token,
            Some(Token::Identifier(_))
                | Some(Token::Number(_))
                | Some(Token::StringLiteral(_))
                | Some(Token::PathLiteral(_))
                | Some(Token::True)
                | Some(Token::False)
                | Some(Token::Null)
                | Some(Token::RightParen)
                | Some(Token::RightBracket)
        )
    }

    fn read_identifier(&mut self) -> String {
        let mut result = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                result.push(c);
                self.advance();
            } else {
                break;
            }
        }
        result
    }

    fn read_number(&mut self) -> String {
        let mut result = String::new();
        let mut has_dot = false;

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                result.push(c);
                self.advance();
            } else if c == '.' && !has_dot && self.peek_ahead(1).map_or(false, |d| d.is_ascii_digit())
            {
                has_dot = true;
                result.push(c);
                self.advance();
            } else {
                break;
            }
        }
        result
    }

    fn read_string(&mut self, quote: char) -> Result<String, RulesIssue> {
        let start = self.here();
        let mut result = String::new();
        self.advance(); // Skip opening quote

        loop {
            match self.advance() {
                Some(c) if c == quote => return Ok(result),
                Some('\\') => match self.advance() {
                    Some('n') => result.push('\n'),
                    Some('t') => result.push('\t'),
                    Some('r') => result.push('\r'),
                    Some('\\') => result.push('\\'),
                    Some('"') => result.push('"'),
                    Some('\'') => result.push('\''),
                    Some(other) => {
                        result.push('\\');
                        result.push(other);
                    }
                    None => return Err(RulesIssue::new("Unterminated string", start)),
                },
                Some('\n') | None => return Err(RulesIssue::new("Unterminated string", start)),
                Some(c) => result.push(c),
            }
        }
    }

    /// Characters allowed in a bare path segment
    fn is_path_char(c: char) -> bool {
        c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '~' | '%' | '@' | '*' | '=')
    }

    /// Read a path literal starting at `/`
    ///
    /// Consumes `/segments`, `{wildcard}` pieces, `$(expr)` interpolations
    /// (balanced parens) and literal `(...)` segments like `(default)`.
    /// An unmatched `)` or any other unrecognized character ends the path.
    fn read_path(&mut self) -> Result<String, RulesIssue> {
        let start = self.here();
        let mut raw = String::new();

        loop {
            match self.peek() {
                Some('/') => {
                    raw.push('/');
                    self.advance();
                }
                Some('$') if self.peek_ahead(1) == Some('(') => {
                    raw.push('$');
                    self.advance();
                    self.consume_balanced_parens(&mut raw, start)?;
                }
                Some('(') => {
                    self.consume_balanced_parens(&mut raw, start)?;
                }
                Some('{') => {
                    raw.push('{');
                    self.advance();
                    loop {
                        match self.advance() {
                            Some('}') => {
                                raw.push('}');
                                break;
                            }
                            Some(c) => raw.push(c),
                            None => {
                                return Err(RulesIssue::new(
                                    "Unterminated path wildcard",
                                    start,
                                ))
                            }
                        }
                    }
                }
                Some(c) if Self::is_path_char(c) => {
                    raw.push(c);
                    self.advance();
                }
                _ => break,
            }
        }

        Ok(raw)
    }

    /// Consume a `(`-opened group tracking nested parenthesis depth
    fn consume_balanced_parens(&mut self, raw: &mut String, start: SourcePos) -> Result<(), RulesIssue> {
        raw.push('(');
        self.advance();
        let mut depth = 1usize;
        while depth > 0 {
            match self.advance() {
                Some('(') => {
                    depth += 1;
                    raw.push('(');
                }
                Some(')') => {
                    depth -= 1;
                    raw.push(')');
                }
                Some(c) => raw.push(c),
                None => return Err(RulesIssue::new("Unterminated path interpolation", start)),
            }
        }
        Ok(())
    }

    fn next_token_inner(&mut self) -> Result<SpannedToken, RulesIssue> {
        self.skip_whitespace()?;
        let pos = self.here();

        let c = match self.peek() {
            Some(c) => c,
            None => return Ok(SpannedToken { token: Token::Eof, pos }),
        };

        // Path literals win over division in expression-start position
        if c == '/' && self.at_path_position() {
            let raw = self.read_path()?;
            return Ok(SpannedToken { token: Token::PathLiteral(raw), pos });
        }

        // Single character tokens
        let simple = match c {
            ';' => Some(Token::Semicolon),
            ':' => Some(Token::Colon),
            ',' => Some(Token::Comma),
            '.' => Some(Token::Dot),
            '(' => Some(Token::LeftParen),
            ')' => Some(Token::RightParen),
            '{' => Some(Token::LeftBrace),
            '}' => Some(Token::RightBrace),
            '[' => Some(Token::LeftBracket),
            ']' => Some(Token::RightBracket),
            '$' => Some(Token::Dollar),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            _ => None,
        };
        if let Some(token) = simple {
            self.advance();
            return Ok(SpannedToken { token, pos });
        }

        // Multi-character operators
        if c == '=' {
            self.advance();
            if self.peek() == Some('=') {
                self.advance();
                return Ok(SpannedToken { token: Token::EqEq, pos });
            }
            return Ok(SpannedToken { token: Token::Assign, pos });
        }
        if c == '!' {
            self.advance();
            if self.peek() == Some('=') {
                self.advance();
                return Ok(SpannedToken { token: Token::NotEq, pos });
            }
            return Ok(SpannedToken { token: Token::Bang, pos });
        }
        if c == '<' {
            self.advance();
            if self.peek() == Some('=') {
                self.advance();
                return Ok(SpannedToken { token: Token::LessEq, pos });
            }
            return Ok(SpannedToken { token: Token::Less, pos });
        }
        if c == '>' {
            self.advance();
            if self.peek() == Some('=') {
                self.advance();
                return Ok(SpannedToken { token: Token::GreaterEq, pos });
            }
            return Ok(SpannedToken { token: Token::Greater, pos });
        }
        if c == '&' {
            self.advance();
            if self.peek() == Some('&') {
                self.advance();
                return Ok(SpannedToken { token: Token::AndAnd, pos });
            }
            return Err(RulesIssue::new("Unexpected character: &", pos));
        }
        if c == '|' {
            self.advance();
            if self.peek() == Some('|') {
                self.advance();
                return Ok(SpannedToken { token: Token::OrOr, pos });
            }
            return Err(RulesIssue::new("Unexpected character: |", pos));
        }

        // String literals (single or double quoted)
        if c == '\'' || c == '"' {
            let s = self.read_string(c)?;
            return Ok(SpannedToken { token: Token::StringLiteral(s), pos });
        }

        // Numbers
        if c.is_ascii_digit() {
            let num = self.read_number();
            return Ok(SpannedToken { token: Token::Number(num), pos });
        }

        // Identifiers and keywords (case-sensitive)
        if c.is_alphabetic() || c == '_' {
            let ident = self.read_identifier();
            let token = match ident.as_str() {
                "rules_version" => Token::RulesVersion,
                "service" => Token::Service,
                "match" => Token::Match,
                "allow" => Token::Allow,
                "if" => Token::If,
                "function" => Token::Function,
                "return" => Token::Return,
                "true" => Token::True,
                "false" => Token::False,
                "null" => Token::Null,
                "in" => Token::In,
                "is" => Token::Is,
                _ => Token::Identifier(ident),
            };
            return Ok(SpannedToken { token, pos });
        }

        Err(RulesIssue::new(format!("Unexpected character: {}", c), pos))
    }

    pub fn next_token(&mut self) -> Result<SpannedToken, RulesIssue> {
        let spanned = self.next_token_inner()?;
        self.last_token = Some(spanned.token.clone());
        Ok(spanned)
    }

    pub fn tokenize(&mut self) -> Result<Vec<SpannedToken>, RulesIssue> {
        let mut tokens = Vec::new();
        loop {
            let spanned = self.next_token()?;
            let done = spanned.token == Token::Eof;
            tokens.push(spanned);
            if done {
                break;
            }
        }
        Ok(tokens)
    }
}
