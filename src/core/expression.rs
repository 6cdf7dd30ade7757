use crate::error::ExpressionError;

/// Deepest operand stack an expression may need at evaluation time.
const MAX_STACK: usize = 32;

/// Compact bytecode instruction
#[derive(Debug, Clone, Copy, PartialEq)]
enum OpCode {
    LoadParam(u16),
    LoadConst(u16),
    Neg,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Compiled expression - data-oriented layout for cache efficiency
///
/// Parameters are addressed by position: `LoadParam(i)` reads the i-th value
/// of the slice passed to [`CompiledExpression::evaluate`], in the order of
/// the names given at compile time.
#[derive(Clone, Debug)]
pub struct CompiledExpression {
    source: String,
    instructions: Vec<OpCode>,
    constants: Vec<f64>, // Constant pool
    param_count: u16,
}

impl CompiledExpression {
    /// Compile `expr` against the ordered list of names it may reference.
    pub fn compile(expr: &str, param_names: &[String]) -> Result<Self, ExpressionError> {
        Compiler::new(param_names).compile(expr)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn param_count(&self) -> usize {
        self.param_count as usize
    }

    /// Evaluate with `params[i]` bound to the i-th compiled name.
    pub fn evaluate(&self, params: &[f64]) -> Result<f64, ExpressionError> {
        if params.len() != self.param_count as usize {
            return Err(ExpressionError::ArityMismatch {
                expected: self.param_count as usize,
                got: params.len(),
            });
        }

        let mut stack = [0.0f64; MAX_STACK];
        let mut sp = 0usize;

        for &inst in &self.instructions {
            match inst {
                OpCode::LoadParam(idx) => {
                    stack[sp] = params[idx as usize];
                    sp += 1;
                }
                OpCode::LoadConst(idx) => {
                    stack[sp] = self.constants[idx as usize];
                    sp += 1;
                }
                OpCode::Neg => stack[sp - 1] = -stack[sp - 1],
                OpCode::Add => {
                    sp -= 1;
                    stack[sp - 1] += stack[sp];
                }
                OpCode::Sub => {
                    sp -= 1;
                    stack[sp - 1] -= stack[sp];
                }
                OpCode::Mul => {
                    sp -= 1;
                    stack[sp - 1] *= stack[sp];
                }
                OpCode::Div => {
                    sp -= 1;
                    let divisor = stack[sp];
                    if divisor == 0.0 {
                        return Err(ExpressionError::DivisionByZero);
                    }
                    stack[sp - 1] /= divisor;
                }
                OpCode::Pow => {
                    sp -= 1;
                    stack[sp - 1] = stack[sp - 1].powf(stack[sp]);
                }
            }
        }

        let value = stack[0];
        if !value.is_finite() {
            return Err(ExpressionError::NonFinite);
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '+' | '-' | '*' | '/' | '^' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Exponent: 1e-6, 2.5E3
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let num = text
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::Parse(format!("Invalid number '{}'", text)))?;
                if !num.is_finite() {
                    return Err(ExpressionError::Parse(format!(
                        "Number '{}' is not finite",
                        text
                    )));
                }
                tokens.push(Token::Number(num));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(ExpressionError::Parse(format!(
                    "Invalid character '{}' in '{}'",
                    other, expr
                )))
            }
        }
    }

    Ok(tokens)
}

/// Recursive-descent compiler emitting postfix bytecode.
///
/// Precedence, loosest first: `+ -`, `* /`, unary sign, `^` (right-associative).
struct Compiler<'a> {
    params: &'a [String],
    tokens: Vec<Token>,
    pos: usize,
    instructions: Vec<OpCode>,
    constants: Vec<f64>,
    depth: usize,
    max_depth: usize,
}

impl<'a> Compiler<'a> {
    fn new(params: &'a [String]) -> Self {
        Self {
            params,
            tokens: Vec::new(),
            pos: 0,
            instructions: Vec::with_capacity(32),
            constants: Vec::with_capacity(8),
            depth: 0,
            max_depth: 0,
        }
    }

    fn compile(mut self, expr: &str) -> Result<CompiledExpression, ExpressionError> {
        if expr.trim().is_empty() {
            return Err(ExpressionError::Parse("Expression cannot be empty".into()));
        }
        if self.params.len() > u16::MAX as usize {
            return Err(ExpressionError::Parse("Too many parameters".into()));
        }

        self.tokens = tokenize(expr)?;
        self.parse_additive()?;

        if let Some(tok) = self.tokens.get(self.pos) {
            return Err(ExpressionError::Parse(format!(
                "Unexpected token {:?} in '{}'",
                tok, expr
            )));
        }
        if self.max_depth > MAX_STACK {
            return Err(ExpressionError::Parse(format!(
                "Expression '{}' is nested too deeply",
                expr
            )));
        }

        Ok(CompiledExpression {
            source: expr.to_string(),
            instructions: self.instructions,
            constants: self.constants,
            param_count: self.params.len() as u16,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn push(&mut self, op: OpCode) {
        match op {
            OpCode::LoadParam(_) | OpCode::LoadConst(_) => {
                self.depth += 1;
                self.max_depth = self.max_depth.max(self.depth);
            }
            OpCode::Neg => {}
            _ => self.depth -= 1,
        }
        self.instructions.push(op);
    }

    fn add_const(&mut self, val: f64) -> u16 {
        // Reuse existing constants
        if let Some(idx) = self.constants.iter().position(|&v| v == val) {
            return idx as u16;
        }
        self.constants.push(val);
        (self.constants.len() - 1) as u16
    }

    fn parse_additive(&mut self) -> Result<(), ExpressionError> {
        self.parse_multiplicative()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            self.parse_multiplicative()?;
            self.push(if op == '+' { OpCode::Add } else { OpCode::Sub });
        }
        Ok(())
    }

    fn parse_multiplicative(&mut self) -> Result<(), ExpressionError> {
        self.parse_unary()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek().cloned() {
            self.pos += 1;
            self.parse_unary()?;
            self.push(if op == '*' { OpCode::Mul } else { OpCode::Div });
        }
        Ok(())
    }

    fn parse_unary(&mut self) -> Result<(), ExpressionError> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                self.parse_unary()?;
                self.push(OpCode::Neg);
                Ok(())
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<(), ExpressionError> {
        self.parse_atom()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            self.parse_unary()?;
            self.push(OpCode::Pow);
        }
        Ok(())
    }

    fn parse_atom(&mut self) -> Result<(), ExpressionError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| ExpressionError::Parse("Unexpected end of expression".into()))?;
        self.pos += 1;

        match token {
            Token::Number(num) => {
                let idx = self.add_const(num);
                self.push(OpCode::LoadConst(idx));
                Ok(())
            }
            Token::Ident(name) => match self.params.iter().position(|p| *p == name) {
                Some(idx) => {
                    self.push(OpCode::LoadParam(idx as u16));
                    Ok(())
                }
                None => Err(ExpressionError::UnknownReference {
                    name,
                    available: self.params.join(", "),
                }),
            },
            Token::LParen => {
                self.parse_additive()?;
                match self.tokens.get(self.pos) {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(())
                    }
                    _ => Err(ExpressionError::Parse("Unmatched '('".into())),
                }
            }
            Token::RParen => Err(ExpressionError::Parse("Unexpected ')'".into())),
            Token::Op(op) => Err(ExpressionError::Parse(format!(
                "Unexpected operator '{}'",
                op
            ))),
        }
    }
}
