//! Tokenizer, parser, bytecode compiler and stack VM for recipe expressions.
//!
//! Expressions are the only executable content a saved analysis carries. They
//! can reference exactly the symbols a [`Compiler`] was built with (variables,
//! parameters and named constants) and the functions listed in [`Function`].

use crate::traits::Scalar;
use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;

/// Built-in unary functions callable from expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Atan,
    Exp,
    Ln,
    Sqrt,
    Abs,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sin" => Some(Function::Sin),
            "cos" => Some(Function::Cos),
            "tan" => Some(Function::Tan),
            "atan" => Some(Function::Atan),
            "exp" => Some(Function::Exp),
            "ln" | "log" => Some(Function::Ln),
            "sqrt" => Some(Function::Sqrt),
            "abs" => Some(Function::Abs),
            _ => None,
        }
    }

    fn apply<T: Scalar>(self, a: T) -> T {
        match self {
            Function::Sin => a.sin(),
            Function::Cos => a.cos(),
            Function::Tan => a.tan(),
            Function::Atan => a.atan(),
            Function::Exp => a.exp(),
            Function::Ln => a.ln(),
            Function::Sqrt => a.sqrt(),
            Function::Abs => a.abs(),
        }
    }
}

/// OpCodes for the Stack-based Virtual Machine.
/// The VM operates on a stack of `Scalar` values (f64 or Dual).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant `f64` value onto the stack.
    LoadConst(f64),
    /// Pushes the value of a state variable (by index) onto the stack.
    LoadVar(usize),
    /// Pushes the value of a parameter (by index) onto the stack.
    LoadParam(usize),
    /// Pops top two values (b, a), pushes (a + b).
    Add,
    /// Pops top two values (b, a), pushes (a - b).
    Sub,
    /// Pops top two values (b, a), pushes (a * b).
    Mul,
    /// Pops top two values (b, a), pushes (a / b).
    Div,
    /// Pops top two values (b, a), pushes (a ^ b).
    Pow,
    /// Pops top value (a), pushes -a.
    Neg,
    /// Pops top value (a), pushes f(a).
    Call(Function),
}

/// Represents a compiled sequence of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

impl Bytecode {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Maximum stack depth reached while executing; used to presize scratch buffers.
    pub fn max_stack_depth(&self) -> usize {
        let mut depth = 0usize;
        let mut max = 0usize;
        for op in &self.ops {
            match op {
                OpCode::LoadConst(_) | OpCode::LoadVar(_) | OpCode::LoadParam(_) => depth += 1,
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Pow => {
                    depth = depth.saturating_sub(1)
                }
                OpCode::Neg | OpCode::Call(_) => {}
            }
            max = max.max(depth);
        }
        max
    }
}

/// Stack-based Virtual Machine for evaluating equations.
///
/// The VM is stateless; `execute` takes all necessary context:
/// - `bytecode`: Instructions to run.
/// - `vars`: Variable values (read-only).
/// - `params`: Parameter values (read-only).
/// - `stack`: A mutable buffer for intermediate computations.
pub struct VM;

impl VM {
    /// Executes the bytecode and returns the value left on the stack.
    ///
    /// Bytecode produced by [`Compiler::compile`] is always balanced; a
    /// malformed program evaluates missing operands as zero.
    pub fn execute<T: Scalar>(
        bytecode: &Bytecode,
        vars: &[T],
        params: &[T],
        stack: &mut Vec<T>,
    ) -> T {
        stack.clear();
        let zero = T::constant(0.0);

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(T::constant(val)),
                OpCode::LoadVar(idx) => stack.push(vars[idx]),
                OpCode::LoadParam(idx) => stack.push(params[idx]),
                OpCode::Neg => {
                    let a = stack.pop().unwrap_or(zero);
                    stack.push(-a);
                }
                OpCode::Call(func) => {
                    let a = stack.pop().unwrap_or(zero);
                    stack.push(func.apply(a));
                }
                binary => {
                    let b = stack.pop().unwrap_or(zero);
                    let a = stack.pop().unwrap_or(zero);
                    stack.push(match binary {
                        OpCode::Add => a + b,
                        OpCode::Sub => a - b,
                        OpCode::Mul => a * b,
                        OpCode::Div => a / b,
                        _ => a.powf(b),
                    });
                }
            }
        }

        stack.pop().unwrap_or(zero)
    }
}

// --- AST & Parser ---

/// Abstract Syntax Tree nodes for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>), // char is operator +, -, *, /, ^
    Unary(char, Box<Expr>),             // only '-'
    Call(String, Box<Expr>),
}

impl Expr {
    /// Every identifier the expression reads, in first-use order.
    pub fn symbols(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Variable(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name.as_str());
                }
            }
            Expr::Binary(left, _, right) => {
                left.collect_symbols(out);
                right.collect_symbols(out);
            }
            Expr::Unary(_, operand) | Expr::Call(_, operand) => operand.collect_symbols(out),
        }
    }
}

/// Compiles an AST (`Expr`) into `Bytecode`.
/// Resolves variable, parameter and constant names; anything else is an error.
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
    pub param_map: HashMap<String, usize>,
    pub constants: HashMap<String, f64>,
}

impl Compiler {
    pub fn new(var_names: &[String], param_names: &[String]) -> Self {
        let var_map = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let param_map = param_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        Self {
            var_map,
            param_map,
            constants: HashMap::new(),
        }
    }

    /// Adds named constants; variables and parameters shadow them.
    pub fn with_constants(mut self, constants: &[(&str, f64)]) -> Self {
        for (name, value) in constants {
            self.constants.insert((*name).to_string(), *value);
        }
        self
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<()> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                if let Some(&idx) = self.var_map.get(name) {
                    ops.push(OpCode::LoadVar(idx));
                } else if let Some(&idx) = self.param_map.get(name) {
                    ops.push(OpCode::LoadParam(idx));
                } else if let Some(&value) = self.constants.get(name) {
                    ops.push(OpCode::LoadConst(value));
                } else {
                    bail!("Unknown variable or parameter: {name}");
                }
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                ops.push(match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    '^' => OpCode::Pow,
                    _ => bail!("Unknown binary operator: {op}"),
                });
            }
            Expr::Unary(op, operand) => {
                self.compile_recursive(operand, ops)?;
                match op {
                    '-' => ops.push(OpCode::Neg),
                    _ => bail!("Unknown unary operator: {op}"),
                }
            }
            Expr::Call(func, arg) => {
                let function =
                    Function::from_name(func).ok_or_else(|| anyhow!("Unknown function: {func}"))?;
                self.compile_recursive(arg, ops)?;
                ops.push(OpCode::Call(function));
            }
        }
        Ok(())
    }
}

/// Parses and compiles in one go.
pub fn compile_expression(input: &str, compiler: &Compiler) -> Result<Bytecode> {
    let expr = parse(input).map_err(|err| anyhow!("Failed to parse \"{input}\": {err}"))?;
    compiler.compile(&expr)
}

// --- Simple Parser ---

/// Parses a string expression into an AST.
pub fn parse(input: &str) -> Result<Expr, String> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    if parser.pos != parser.tokens.len() {
        return Err("Unexpected trailing input".to_string());
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num_str = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num_str.push(d);
                    chars.next();
                } else if (d == 'e' || d == 'E') && !num_str.contains(['e', 'E'].as_slice()) {
                    // scientific notation: 5e10, 1.5E-3
                    num_str.push(d);
                    chars.next();
                    if let Some(&sign) = chars.peek() {
                        if sign == '+' || sign == '-' {
                            num_str.push(sign);
                            chars.next();
                        }
                    }
                } else {
                    break;
                }
            }
            let value = num_str
                .parse()
                .map_err(|_| format!("Invalid number literal: {num_str}"))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            tokens.push(match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                _ => return Err(format!("Unexpected character: {c}")),
            });
            chars.next();
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_expression(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_product()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => '+',
                Token::Minus => '-',
                _ => break,
            };
            self.consume();
            let right = self.parse_product()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Star => '*',
                Token::Slash => '/',
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    // Unary minus binds looser than '^' so that -x^2 == -(x^2).
    fn parse_unary(&mut self) -> Result<Expr, String> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary('-', Box::new(expr)));
        }
        self.parse_power()
    }

    // Right associative: a^b^c == a^(b^c).
    fn parse_power(&mut self) -> Result<Expr, String> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume(); // eat '('
                    let arg = self.parse_expression()?;
                    if let Some(Token::RParen) = self.consume() {
                        Ok(Expr::Call(name, Box::new(arg)))
                    } else {
                        Err("Expected ')'".to_string())
                    }
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                if let Some(Token::RParen) = self.consume() {
                    Ok(expr)
                } else {
                    Err("Expected ')'".to_string())
                }
            }
            Some(token) => Err(format!("Unexpected token: {token:?}")),
            None => Err("Unexpected end of expression".to_string()),
        }
    }
}
