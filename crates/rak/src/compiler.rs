//! Single-pass compiler: a recursive-descent parser fused with a bytecode
//! emitter.
//!
//! There is no AST. Every parse function appends instructions directly to
//! the chunk under construction, so the shape of the call graph *is* the
//! grammar. Jumps are emitted as `NOP` placeholders and back-patched with
//! the concrete word once the target offset is known.
//!
//! ```text
//! chunk     := stmt* EOF
//! stmt      := block | let_decl | if_stmt | echo_stmt | expr_stmt
//! block     := '{' stmt* '}'
//! let_decl  := 'let' IDENT ('=' expr)? ';'
//! if_stmt   := 'if' expr block ('else' (if_stmt | block))?
//! echo_stmt := 'echo' expr ';'
//! expr_stmt := expr ';'
//! expr      := and_expr ('||' and_expr)*
//! and_expr  := eq_expr ('&&' eq_expr)*
//! eq_expr   := cmp_expr (('=='|'!=') cmp_expr)*
//! cmp_expr  := range_expr (('>'|'>='|'<'|'<=') range_expr)*
//! range_expr:= add_expr ('..' add_expr)?
//! add_expr  := mul_expr (('+'|'-') mul_expr)*
//! mul_expr  := unary (('*'|'/'|'%') unary)*
//! unary     := ('!' | '-') unary | subscr
//! subscr    := prim ('[' expr ']' | '.' IDENT)*
//! prim      := NIL | FALSE | TRUE | NUMBER | STRING | IDENT
//!            | '[' (expr (',' expr)*)? ']'
//!            | '{' (field (',' field)*)? '}'
//!            | if_expr | '(' expr ')'
//! field     := IDENT ':' expr
//! ```
//!
//! `if` appears both as a statement and as an expression. Both forms leave
//! a value on the stack (a missing `else` or a statement block contributes
//! `nil`); the statement form pops it. Chained `else if` lowers by
//! recursion, threading the chain's exit offset back through each level so
//! every arm's exit jump lands on the same instruction.

use std::borrow::Cow;
use std::rc::Rc;

use crate::bytecode::{Function, Instr, Opcode};
use crate::error::{Error, Result};
use crate::lexer::{Lexer, TokenKind};
use crate::value::{Closure, Str, Value};

/// Maximum number of elements in an array literal (8-bit operand).
pub const MAX_ELEMENTS: usize = u8::MAX as usize;

/// Maximum number of fields in a record literal (8-bit operand).
pub const MAX_FIELDS: usize = u8::MAX as usize;

/// Compile a source buffer into a closure wrapping the top-level function.
///
/// The top-level function is named after `file_name` and takes no
/// arguments. Compilation is all-or-nothing: the first error aborts and no
/// partial chunk escapes.
pub fn compile(file_name: &str, source: &str) -> Result<Rc<Closure>> {
    let mut compiler = Compiler::new(file_name, source)?;
    compiler.compile_chunk()?;
    Ok(Rc::new(Closure::Function(Rc::new(compiler.finish()))))
}

/// One resolved local: its spelling, value-stack slot, and scope depth.
struct Symbol<'src> {
    name: Cow<'src, str>,
    idx: u8,
    depth: u32,
}

/// Per-function compilation state.
pub struct Compiler<'src> {
    lex: Lexer<'src>,
    fun: Function,
    symbols: Vec<Symbol<'src>>,
    scope_depth: u32,
}

impl<'src> Compiler<'src> {
    pub fn new(file_name: &str, source: &'src str) -> Result<Self> {
        let lex = Lexer::new(source)?;
        let mut symbols = Vec::new();
        // Slot 0 of every frame aliases the closure being executed, so the
        // first named local lands in slot 1.
        symbols.push(Symbol {
            name: Cow::Borrowed(""),
            idx: 0,
            depth: 0,
        });
        Ok(Self {
            lex,
            fun: Function::new(Some(Rc::from(file_name)), 0),
            symbols,
            scope_depth: 0,
        })
    }

    pub fn finish(self) -> Function {
        self.fun
    }

    pub fn compile_chunk(&mut self) -> Result<()> {
        while !self.check(TokenKind::Eof) {
            self.compile_stmt()?;
        }
        self.emit(Instr::op(Opcode::Halt))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Token helpers
    // -----------------------------------------------------------------------

    fn check(&self, kind: TokenKind) -> bool {
        self.lex.tok.kind == kind
    }

    fn advance(&mut self) -> Result<()> {
        self.lex.next()
    }

    fn consume(&mut self, kind: TokenKind) -> Result<()> {
        if !self.check(kind) {
            return Err(self.expected(kind.describe()));
        }
        self.advance()
    }

    fn unexpected(&self) -> Error {
        let tok = &self.lex.tok;
        if tok.kind == TokenKind::Eof {
            return Error::UnexpectedEof {
                ln: tok.ln,
                col: tok.col,
            };
        }
        Error::UnexpectedToken {
            got: tok.text.to_string(),
            ln: tok.ln,
            col: tok.col,
        }
    }

    fn expected(&self, expected: &'static str) -> Error {
        let tok = &self.lex.tok;
        let got = if tok.kind == TokenKind::Eof {
            "end of file".to_string()
        } else {
            tok.text.to_string()
        };
        Error::ExpectedToken {
            expected,
            got,
            ln: tok.ln,
            col: tok.col,
        }
    }

    // -----------------------------------------------------------------------
    // Emission helpers
    // -----------------------------------------------------------------------

    fn emit(&mut self, instr: Instr) -> Result<u16> {
        let ln = self.lex.tok.ln;
        self.fun.chunk_mut().push_instr(instr, ln)
    }

    fn offset(&self) -> u16 {
        self.fun.chunk().instrs().len() as u16
    }

    fn patch(&mut self, idx: u16, instr: Instr) {
        self.fun.chunk_mut().patch(idx, instr);
    }

    /// Install a constant, reusing an existing string entry with the same
    /// content.
    fn add_const(&mut self, val: Value) -> Result<u8> {
        if let Value::String(new) = &val {
            let existing = self.fun.chunk().consts().iter().position(
                |c| matches!(c, Value::String(old) if old == new),
            );
            if let Some(idx) = existing {
                return Ok(idx as u8);
            }
        }
        self.fun.chunk_mut().push_const(val)
    }

    fn string_const(&mut self, text: &str) -> Result<u8> {
        self.add_const(Value::String(Rc::new(Str::from(text))))
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn compile_stmt(&mut self) -> Result<()> {
        match self.lex.tok.kind {
            TokenKind::LBrace => self.compile_block(),
            TokenKind::LetKw => self.compile_let_decl(),
            TokenKind::IfKw => self.compile_if_stmt(),
            TokenKind::EchoKw => self.compile_echo_stmt(),
            _ => self.compile_expr_stmt(),
        }
    }

    fn compile_block(&mut self) -> Result<()> {
        self.advance()?;
        self.begin_scope();
        while !self.check(TokenKind::RBrace) {
            if self.check(TokenKind::Eof) {
                return Err(self.expected(TokenKind::RBrace.describe()));
            }
            self.compile_stmt()?;
        }
        self.advance()?;
        self.end_scope()
    }

    fn compile_let_decl(&mut self) -> Result<()> {
        self.advance()?;
        if !self.check(TokenKind::Ident) {
            return Err(self.expected(TokenKind::Ident.describe()));
        }
        let name = self.lex.tok.text.clone();
        let (ln, col) = (self.lex.tok.ln, self.lex.tok.col);
        self.advance()?;
        if self.check(TokenKind::Eq) {
            self.advance()?;
            self.compile_expr()?;
            self.consume(TokenKind::Semicolon)?;
            return self.define_local(name, ln, col);
        }
        self.consume(TokenKind::Semicolon)?;
        self.emit(Instr::op(Opcode::PushNil))?;
        self.define_local(name, ln, col)
    }

    fn compile_echo_stmt(&mut self) -> Result<()> {
        self.advance()?;
        self.compile_expr()?;
        self.consume(TokenKind::Semicolon)?;
        self.emit(Instr::op(Opcode::Echo))?;
        Ok(())
    }

    fn compile_expr_stmt(&mut self) -> Result<()> {
        self.compile_expr()?;
        self.consume(TokenKind::Semicolon)?;
        self.emit(Instr::op(Opcode::Pop))?;
        Ok(())
    }

    /// An `if` statement is the value-producing chain followed by a `POP`,
    /// so the stack is balanced on every path.
    fn compile_if_stmt(&mut self) -> Result<()> {
        self.compile_if_stmt_chain()?;
        self.emit(Instr::op(Opcode::Pop))?;
        Ok(())
    }

    /// One `if`/`else if` level of the statement form. Returns the chain's
    /// exit offset so each level can patch its exit jump to the same spot.
    fn compile_if_stmt_chain(&mut self) -> Result<u16> {
        self.advance()?;
        self.compile_expr()?;
        let jump1 = self.emit(Instr::op(Opcode::Nop))?;
        self.emit(Instr::op(Opcode::Pop))?;
        if !self.check(TokenKind::LBrace) {
            return Err(self.expected(TokenKind::LBrace.describe()));
        }
        self.compile_block()?;
        self.emit(Instr::op(Opcode::PushNil))?;
        let jump2 = self.emit(Instr::op(Opcode::Nop))?;
        self.patch(jump1, Instr::with_ab(Opcode::JumpIfFalse, self.offset()));
        let exit = self.compile_if_stmt_rest()?;
        self.patch(jump2, Instr::with_ab(Opcode::Jump, exit));
        Ok(exit)
    }

    fn compile_if_stmt_rest(&mut self) -> Result<u16> {
        // False branch: the condition is still on the stack.
        self.emit(Instr::op(Opcode::Pop))?;
        if !self.check(TokenKind::ElseKw) {
            self.emit(Instr::op(Opcode::PushNil))?;
            return Ok(self.offset());
        }
        self.advance()?;
        if self.check(TokenKind::IfKw) {
            return self.compile_if_stmt_chain();
        }
        if !self.check(TokenKind::LBrace) {
            return Err(self.expected(TokenKind::LBrace.describe()));
        }
        self.compile_block()?;
        self.emit(Instr::op(Opcode::PushNil))?;
        Ok(self.offset())
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn compile_expr(&mut self) -> Result<()> {
        self.compile_and_expr()?;
        self.compile_or_rest()?;
        Ok(())
    }

    /// `a || b` lowers to `<a>; JUMP_IF_TRUE exit; POP; <b>` with every
    /// jump in the chain patched to the shared exit.
    fn compile_or_rest(&mut self) -> Result<u16> {
        if !self.check(TokenKind::PipePipe) {
            return Ok(self.offset());
        }
        self.advance()?;
        let jump = self.emit(Instr::op(Opcode::Nop))?;
        self.emit(Instr::op(Opcode::Pop))?;
        self.compile_and_expr()?;
        let exit = self.compile_or_rest()?;
        self.patch(jump, Instr::with_ab(Opcode::JumpIfTrue, exit));
        Ok(exit)
    }

    fn compile_and_expr(&mut self) -> Result<()> {
        self.compile_eq_expr()?;
        self.compile_and_rest()?;
        Ok(())
    }

    fn compile_and_rest(&mut self) -> Result<u16> {
        if !self.check(TokenKind::AmpAmp) {
            return Ok(self.offset());
        }
        self.advance()?;
        let jump = self.emit(Instr::op(Opcode::Nop))?;
        self.emit(Instr::op(Opcode::Pop))?;
        self.compile_eq_expr()?;
        let exit = self.compile_and_rest()?;
        self.patch(jump, Instr::with_ab(Opcode::JumpIfFalse, exit));
        Ok(exit)
    }

    fn compile_eq_expr(&mut self) -> Result<()> {
        self.compile_cmp_expr()?;
        loop {
            if self.check(TokenKind::EqEq) {
                self.advance()?;
                self.compile_cmp_expr()?;
                self.emit(Instr::op(Opcode::Eq))?;
                continue;
            }
            if self.check(TokenKind::BangEq) {
                self.advance()?;
                self.compile_cmp_expr()?;
                self.emit(Instr::op(Opcode::Eq))?;
                self.emit(Instr::op(Opcode::Not))?;
                continue;
            }
            return Ok(());
        }
    }

    /// `>=` lowers to `LT; NOT` and `<=` to `GT; NOT`.
    fn compile_cmp_expr(&mut self) -> Result<()> {
        self.compile_range_expr()?;
        loop {
            match self.lex.tok.kind {
                TokenKind::GtEq => {
                    self.advance()?;
                    self.compile_range_expr()?;
                    self.emit(Instr::op(Opcode::Lt))?;
                    self.emit(Instr::op(Opcode::Not))?;
                }
                TokenKind::Gt => {
                    self.advance()?;
                    self.compile_range_expr()?;
                    self.emit(Instr::op(Opcode::Gt))?;
                }
                TokenKind::LtEq => {
                    self.advance()?;
                    self.compile_range_expr()?;
                    self.emit(Instr::op(Opcode::Gt))?;
                    self.emit(Instr::op(Opcode::Not))?;
                }
                TokenKind::Lt => {
                    self.advance()?;
                    self.compile_range_expr()?;
                    self.emit(Instr::op(Opcode::Lt))?;
                }
                _ => return Ok(()),
            }
        }
    }

    fn compile_range_expr(&mut self) -> Result<()> {
        self.compile_add_expr()?;
        if !self.check(TokenKind::DotDot) {
            return Ok(());
        }
        self.advance()?;
        self.compile_add_expr()?;
        self.emit(Instr::op(Opcode::NewRange))?;
        Ok(())
    }

    fn compile_add_expr(&mut self) -> Result<()> {
        self.compile_mul_expr()?;
        loop {
            if self.check(TokenKind::Plus) {
                self.advance()?;
                self.compile_mul_expr()?;
                self.emit(Instr::op(Opcode::Add))?;
                continue;
            }
            if self.check(TokenKind::Minus) {
                self.advance()?;
                self.compile_mul_expr()?;
                self.emit(Instr::op(Opcode::Sub))?;
                continue;
            }
            return Ok(());
        }
    }

    fn compile_mul_expr(&mut self) -> Result<()> {
        self.compile_unary_expr()?;
        loop {
            match self.lex.tok.kind {
                TokenKind::Star => {
                    self.advance()?;
                    self.compile_unary_expr()?;
                    self.emit(Instr::op(Opcode::Mul))?;
                }
                TokenKind::Slash => {
                    self.advance()?;
                    self.compile_unary_expr()?;
                    self.emit(Instr::op(Opcode::Div))?;
                }
                TokenKind::Percent => {
                    self.advance()?;
                    self.compile_unary_expr()?;
                    self.emit(Instr::op(Opcode::Mod))?;
                }
                _ => return Ok(()),
            }
        }
    }

    fn compile_unary_expr(&mut self) -> Result<()> {
        if self.check(TokenKind::Bang) {
            self.advance()?;
            self.compile_unary_expr()?;
            self.emit(Instr::op(Opcode::Not))?;
            return Ok(());
        }
        if self.check(TokenKind::Minus) {
            self.advance()?;
            self.compile_unary_expr()?;
            self.emit(Instr::op(Opcode::Neg))?;
            return Ok(());
        }
        self.compile_subscr_expr()
    }

    fn compile_subscr_expr(&mut self) -> Result<()> {
        self.compile_prim_expr()?;
        loop {
            if self.check(TokenKind::LBracket) {
                self.advance()?;
                self.compile_expr()?;
                self.consume(TokenKind::RBracket)?;
                self.emit(Instr::op(Opcode::LoadElement))?;
                continue;
            }
            if self.check(TokenKind::Dot) {
                self.advance()?;
                if !self.check(TokenKind::Ident) {
                    return Err(self.expected(TokenKind::Ident.describe()));
                }
                let name = self.lex.tok.text.clone();
                self.advance()?;
                let idx = self.string_const(&name)?;
                self.emit(Instr::with_a(Opcode::LoadField, idx))?;
                continue;
            }
            return Ok(());
        }
    }

    fn compile_prim_expr(&mut self) -> Result<()> {
        match self.lex.tok.kind {
            TokenKind::NilKw => {
                self.advance()?;
                self.emit(Instr::op(Opcode::PushNil))?;
                Ok(())
            }
            TokenKind::FalseKw => {
                self.advance()?;
                self.emit(Instr::op(Opcode::PushFalse))?;
                Ok(())
            }
            TokenKind::TrueKw => {
                self.advance()?;
                self.emit(Instr::op(Opcode::PushTrue))?;
                Ok(())
            }
            TokenKind::Number => {
                let text = self.lex.tok.text.clone();
                self.advance()?;
                let val = Value::number_from_str(&text)?;
                let idx = self.add_const(val)?;
                self.emit(Instr::with_a(Opcode::LoadConst, idx))?;
                Ok(())
            }
            TokenKind::String => {
                let text = self.lex.tok.text.clone();
                self.advance()?;
                let idx = self.string_const(&text)?;
                self.emit(Instr::with_a(Opcode::LoadConst, idx))?;
                Ok(())
            }
            TokenKind::Ident => {
                let name = self.lex.tok.text.clone();
                let (ln, col) = (self.lex.tok.ln, self.lex.tok.col);
                self.advance()?;
                let idx = self.resolve_local(&name, ln, col)?;
                self.emit(Instr::with_a(Opcode::LoadLocal, idx))?;
                Ok(())
            }
            TokenKind::LBracket => self.compile_array(),
            TokenKind::LBrace => self.compile_record(),
            TokenKind::IfKw => {
                self.compile_if_expr_chain()?;
                Ok(())
            }
            TokenKind::LParen => {
                self.advance()?;
                self.compile_expr()?;
                self.consume(TokenKind::RParen)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn compile_array(&mut self) -> Result<()> {
        self.advance()?;
        if self.check(TokenKind::RBracket) {
            self.advance()?;
            self.emit(Instr::with_a(Opcode::NewArray, 0))?;
            return Ok(());
        }
        self.compile_expr()?;
        let mut len: usize = 1;
        while self.check(TokenKind::Comma) {
            self.advance()?;
            self.compile_expr()?;
            len += 1;
        }
        self.consume(TokenKind::RBracket)?;
        if len > MAX_ELEMENTS {
            return Err(Error::TooManyElements);
        }
        self.emit(Instr::with_a(Opcode::NewArray, len as u8))?;
        Ok(())
    }

    fn compile_record(&mut self) -> Result<()> {
        self.advance()?;
        if self.check(TokenKind::RBrace) {
            self.advance()?;
            self.emit(Instr::with_a(Opcode::NewRecord, 0))?;
            return Ok(());
        }
        self.compile_field()?;
        let mut len: usize = 1;
        while self.check(TokenKind::Comma) {
            self.advance()?;
            self.compile_field()?;
            len += 1;
        }
        self.consume(TokenKind::RBrace)?;
        if len > MAX_FIELDS {
            return Err(Error::TooManyFields);
        }
        self.emit(Instr::with_a(Opcode::NewRecord, len as u8))?;
        Ok(())
    }

    fn compile_field(&mut self) -> Result<()> {
        if !self.check(TokenKind::Ident) {
            return Err(self.expected(TokenKind::Ident.describe()));
        }
        let name = self.lex.tok.text.clone();
        self.advance()?;
        self.consume(TokenKind::Colon)?;
        let idx = self.string_const(&name)?;
        self.emit(Instr::with_a(Opcode::LoadConst, idx))?;
        self.compile_expr()
    }

    /// One `if`/`else if` level of the expression form. Both arms are
    /// `{ expr }` blocks; a missing `else` contributes `nil`.
    fn compile_if_expr_chain(&mut self) -> Result<u16> {
        self.advance()?;
        self.compile_expr()?;
        let jump1 = self.emit(Instr::op(Opcode::Nop))?;
        self.emit(Instr::op(Opcode::Pop))?;
        self.compile_block_expr()?;
        let jump2 = self.emit(Instr::op(Opcode::Nop))?;
        self.patch(jump1, Instr::with_ab(Opcode::JumpIfFalse, self.offset()));
        let exit = self.compile_if_expr_rest()?;
        self.patch(jump2, Instr::with_ab(Opcode::Jump, exit));
        Ok(exit)
    }

    fn compile_block_expr(&mut self) -> Result<()> {
        self.consume(TokenKind::LBrace)?;
        self.compile_expr()?;
        self.consume(TokenKind::RBrace)
    }

    fn compile_if_expr_rest(&mut self) -> Result<u16> {
        // False branch: the condition is still on the stack.
        self.emit(Instr::op(Opcode::Pop))?;
        if !self.check(TokenKind::ElseKw) {
            self.emit(Instr::op(Opcode::PushNil))?;
            return Ok(self.offset());
        }
        self.advance()?;
        if self.check(TokenKind::IfKw) {
            return self.compile_if_expr_chain();
        }
        self.compile_block_expr()?;
        Ok(self.offset())
    }

    // -----------------------------------------------------------------------
    // Scopes and locals
    // -----------------------------------------------------------------------

    fn begin_scope(&mut self) {
        self.scope_depth += 1;
    }

    /// Pop the symbols of the closing scope, one `POP` per local, so the
    /// value stack shrinks back to the scope's entry height.
    fn end_scope(&mut self) -> Result<()> {
        let mut count = 0;
        for sym in self.symbols.iter().rev() {
            if sym.depth != self.scope_depth {
                break;
            }
            count += 1;
        }
        for _ in 0..count {
            self.emit(Instr::op(Opcode::Pop))?;
        }
        self.symbols.truncate(self.symbols.len() - count);
        self.scope_depth -= 1;
        Ok(())
    }

    fn define_local(&mut self, name: Cow<'src, str>, ln: u32, col: u32) -> Result<()> {
        for sym in self.symbols.iter().rev() {
            if sym.depth != self.scope_depth {
                break;
            }
            if sym.name == name {
                return Err(Error::DuplicateLocal {
                    name: name.to_string(),
                    ln,
                    col,
                });
            }
        }
        let idx = self.symbols.len();
        if idx > u8::MAX as usize {
            return Err(Error::TooManyLocals);
        }
        self.symbols.push(Symbol {
            name,
            idx: idx as u8,
            depth: self.scope_depth,
        });
        Ok(())
    }

    /// Resolve a name to the nearest enclosing binding's slot.
    fn resolve_local(&self, name: &str, ln: u32, col: u32) -> Result<u8> {
        for sym in self.symbols.iter().rev() {
            if sym.name == name {
                return Ok(sym.idx);
            }
        }
        Err(Error::UndefinedLocal {
            name: name.to_string(),
            ln,
            col,
        })
    }
}
