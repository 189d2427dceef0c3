//! Statement and expression parser over the laid-out token stream.

use chumsky::{
    error::RichReason,
    input::{Stream, ValueInput},
    pratt::*,
    prelude::*,
};

use super::error::ScriptError;
use super::lexer::{tokenize, LineIndex, Span, Token};
use super::value::{BinaryOp, CompareOp, Value};

pub type ParseError<'src> = Rich<'src, Token, Span>;

/// Magnitude of `i64::MIN`; only valid as the operand of a unary minus.
const MIN_INT_MAGNITUDE: u64 = 1 << 63;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Name(String),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Subscript(Box<Expr>, Box<Expr>),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<(String, Expr)>,
    },
    Negate(Box<Expr>),
    Plus(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    Assign { target: Expr, value: Expr },
    AugAssign { target: Expr, op: BinaryOp, value: Expr },
    If { branches: Vec<(Expr, Vec<Stmt>)>, orelse: Vec<Stmt> },
    While { condition: Expr, body: Vec<Stmt> },
    For { var: String, iter: Expr, body: Vec<Stmt> },
    Break,
    Continue,
    Pass,
    Return(Option<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

/// A parsed script.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

pub fn parse(source: &str) -> Result<Program, ScriptError> {
    let tokens = tokenize(source)?;
    let lines = LineIndex::new(source);
    let eoi = Span::from(source.len()..source.len());
    let body = statements(&lines)
        .then_ignore(end())
        .parse(Stream::from_iter(tokens).map(eoi, |(token, span)| (token, span)))
        .into_result()
        .map_err(|errors| syntax_error(errors, &lines))?;
    check_loops(&body, false)?;
    Ok(Program { body })
}

fn syntax_error(errors: Vec<ParseError<'_>>, lines: &LineIndex) -> ScriptError {
    let Some(error) = errors.into_iter().min_by_key(|e| e.span().start) else {
        return ScriptError::syntax(1, "invalid syntax");
    };
    let message = match error.reason() {
        RichReason::Custom(message) => message.clone(),
        RichReason::ExpectedFound { found: Some(found), .. } => match &**found {
            Token::Indent => "unexpected indent".to_string(),
            token => format!("invalid syntax near {token}"),
        },
        _ => "unexpected end of input".to_string(),
    };
    ScriptError::syntax(lines.line(error.span().start), message)
}

/// `break` and `continue` must sit inside a loop body.
fn check_loops(body: &[Stmt], in_loop: bool) -> Result<(), ScriptError> {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Break if !in_loop => return Err(ScriptError::syntax(stmt.line, "'break' outside loop")),
            StmtKind::Continue if !in_loop => {
                return Err(ScriptError::syntax(stmt.line, "'continue' outside loop"))
            }
            StmtKind::If { branches, orelse } => {
                for (_, branch) in branches {
                    check_loops(branch, in_loop)?;
                }
                check_loops(orelse, in_loop)?;
            }
            StmtKind::While { body, .. } | StmtKind::For { body, .. } => check_loops(body, true)?,
            _ => {}
        }
    }
    Ok(())
}

enum Argument {
    Positional(Expr),
    Keyword(String, Expr),
}

enum Suffix {
    Call(Vec<Expr>, Vec<(String, Expr)>),
    Index(Expr),
}

fn split_arguments(arguments: Vec<Argument>) -> (Vec<Expr>, Vec<(String, Expr)>, Option<String>) {
    let mut args = Vec::new();
    let mut keywords: Vec<(String, Expr)> = Vec::new();
    let mut problem = None;
    for argument in arguments {
        match argument {
            Argument::Positional(expr) => {
                if !keywords.is_empty() {
                    problem.get_or_insert_with(|| "positional argument follows keyword argument".to_string());
                }
                args.push(expr);
            }
            Argument::Keyword(name, expr) => {
                if keywords.iter().any(|(k, _)| *k == name) {
                    problem.get_or_insert_with(|| format!("keyword argument repeated: {name}"));
                }
                keywords.push((name, expr));
            }
        }
    }
    (args, keywords, problem)
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary(op, Box::new(left), Box::new(right))
}

fn expression<'src, I>() -> impl Parser<'src, I, Expr, extra::Err<ParseError<'src>>> + Clone
where
    I: ValueInput<'src, Token = Token, Span = Span>,
{
    recursive(|expr| {
        let name = select! { Token::Name(name) => name };

        let int = select! { Token::Int(n) => n }.try_map(|n, span| {
            i64::try_from(n)
                .map(|n| Expr::Literal(Value::Int(n)))
                .map_err(|_| Rich::custom(span, format!("integer literal too large: {n}")))
        });
        // folded before the range check; `**` binds tighter, so leave that case alone
        let min_int = just(Token::Minus)
            .ignore_then(select! { Token::Int(n) if n == MIN_INT_MAGNITUDE => () })
            .then_ignore(just(Token::DoubleStar).not())
            .to(Expr::Literal(Value::Int(i64::MIN)));
        let constant = select! {
            Token::Float(f) => Expr::Literal(Value::Float(f)),
            Token::True => Expr::Literal(Value::Bool(true)),
            Token::False => Expr::Literal(Value::Bool(false)),
            Token::None => Expr::Literal(Value::None),
        };
        // adjacent literals concatenate
        let string = select! { Token::Str(text) => text }
            .repeated()
            .at_least(1)
            .collect::<Vec<String>>()
            .map(|parts| Expr::Literal(Value::Str(parts.concat().into())));

        let list = expr
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::BracketOpen), just(Token::BracketClose))
            .map(Expr::List);
        let dict = expr
            .clone()
            .then_ignore(just(Token::Colon))
            .then(expr.clone())
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::BraceOpen), just(Token::BraceClose))
            .map(Expr::Dict);
        let parenthesized = expr.clone().delimited_by(just(Token::ParenOpen), just(Token::ParenClose));

        let atom = choice((
            min_int,
            int,
            constant,
            string,
            name.clone().map(Expr::Name),
            parenthesized,
            list,
            dict,
        ));

        let argument = name
            .then_ignore(just(Token::Assign))
            .then(expr.clone())
            .map(|(name, value)| Argument::Keyword(name, value))
            .or(expr.clone().map(Argument::Positional));
        let call = argument
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::ParenOpen), just(Token::ParenClose))
            .validate(|arguments, extra, emitter| {
                let (args, keywords, problem) = split_arguments(arguments);
                if let Some(problem) = problem {
                    emitter.emit(Rich::custom(extra.span(), problem));
                }
                Suffix::Call(args, keywords)
            });
        let index = expr
            .clone()
            .delimited_by(just(Token::BracketOpen), just(Token::BracketClose))
            .map(Suffix::Index);
        let postfix = atom.foldl(call.or(index).repeated(), |target, suffix| match suffix {
            Suffix::Call(args, keywords) => Expr::Call { callee: Box::new(target), args, keywords },
            Suffix::Index(index) => Expr::Subscript(Box::new(target), Box::new(index)),
        });

        // `**` binds tighter than a unary sign on its left and looser on its right
        let arithmetic = postfix
            .pratt((
                prefix(5, just(Token::Minus), |_, rhs, _| Expr::Negate(Box::new(rhs))),
                prefix(5, just(Token::Plus), |_, rhs, _| Expr::Plus(Box::new(rhs))),
                infix(right(6), just(Token::DoubleStar), |l, _, r, _| binary(BinaryOp::Pow, l, r)),
                infix(
                    left(4),
                    select! {
                        Token::Star => BinaryOp::Mul,
                        Token::Slash => BinaryOp::Div,
                        Token::DoubleSlash => BinaryOp::FloorDiv,
                        Token::Percent => BinaryOp::Mod,
                    },
                    |l, op, r, _| binary(op, l, r),
                ),
                infix(
                    left(3),
                    select! { Token::Plus => BinaryOp::Add, Token::Minus => BinaryOp::Sub },
                    |l, op, r, _| binary(op, l, r),
                ),
            ))
            .boxed();

        let compare_op = select! {
            Token::Equal => CompareOp::Equal,
            Token::NotEqual => CompareOp::NotEqual,
            Token::Less => CompareOp::Less,
            Token::LessOrEqual => CompareOp::LessOrEqual,
            Token::Greater => CompareOp::Greater,
            Token::GreaterOrEqual => CompareOp::GreaterOrEqual,
        };
        let comparison = arithmetic
            .clone()
            .then(compare_op.then(arithmetic).repeated().collect::<Vec<_>>())
            .validate(|(first, rest), extra, emitter| {
                if rest.len() > 1 {
                    emitter.emit(Rich::custom(extra.span(), "chained comparisons are not supported"));
                }
                rest.into_iter()
                    .fold(first, |l, (op, r)| Expr::Compare(op, Box::new(l), Box::new(r)))
            });

        comparison
            .pratt((
                prefix(3, just(Token::Not), |_, rhs, _| Expr::Not(Box::new(rhs))),
                infix(left(2), just(Token::And), |l, _, r, _| Expr::And(Box::new(l), Box::new(r))),
                infix(left(1), just(Token::Or), |l, _, r, _| Expr::Or(Box::new(l), Box::new(r))),
            ))
            .boxed()
    })
}

fn statements<'src, I>(lines: &'src LineIndex) -> impl Parser<'src, I, Vec<Stmt>, extra::Err<ParseError<'src>>>
where
    I: ValueInput<'src, Token = Token, Span = Span>,
{
    let expr = expression::<I>().boxed();
    let name = select! { Token::Name(name) => name };

    let assign_op = select! {
        Token::Assign => None,
        Token::PlusAssign => Some(BinaryOp::Add),
        Token::MinusAssign => Some(BinaryOp::Sub),
        Token::StarAssign => Some(BinaryOp::Mul),
        Token::SlashAssign => Some(BinaryOp::Div),
    };
    let expression_or_assignment = expr
        .clone()
        .then(assign_op.then(expr.clone()).or_not())
        .validate(|(target, assignment), extra, emitter| match assignment {
            None => StmtKind::Expr(target),
            Some((op, value)) => {
                if !matches!(target, Expr::Name(_) | Expr::Subscript(..)) {
                    emitter.emit(Rich::custom(extra.span(), "cannot assign to expression"));
                }
                match op {
                    None => StmtKind::Assign { target, value },
                    Some(op) => StmtKind::AugAssign { target, op, value },
                }
            }
        });
    let simple = choice((
        just(Token::Pass).to(StmtKind::Pass),
        just(Token::Break).to(StmtKind::Break),
        just(Token::Continue).to(StmtKind::Continue),
        just(Token::Return).ignore_then(expr.clone().or_not()).map(StmtKind::Return),
        expression_or_assignment,
    ));
    let simple_line = simple
        .map_with(move |kind, extra| Stmt { kind, line: lines.line(extra.span().start) })
        .then_ignore(just(Token::Newline))
        .boxed();

    recursive(|stmt| {
        let suite = stmt
            .repeated()
            .at_least(1)
            .collect::<Vec<_>>()
            .delimited_by(just(Token::Indent), just(Token::Dedent));
        // `':' NEWLINE INDENT stmt+ DEDENT`, or `':' simple_stmt` on one line
        let block = just(Token::Colon)
            .ignore_then(choice((
                just(Token::Newline).ignore_then(suite),
                simple_line.clone().map(|stmt| vec![stmt]),
            )))
            .boxed();

        let if_stmt = just(Token::If)
            .ignore_then(expr.clone())
            .then(block.clone())
            .then(
                just(Token::Elif)
                    .ignore_then(expr.clone())
                    .then(block.clone())
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .then(just(Token::Else).ignore_then(block.clone()).or_not())
            .map(|(((condition, body), elifs), orelse)| {
                let mut branches = vec![(condition, body)];
                branches.extend(elifs);
                StmtKind::If { branches, orelse: orelse.unwrap_or_default() }
            });
        let while_stmt = just(Token::While)
            .ignore_then(expr.clone())
            .then(block.clone())
            .map(|(condition, body)| StmtKind::While { condition, body });
        let for_stmt = just(Token::For)
            .ignore_then(name)
            .then_ignore(just(Token::In))
            .then(expr.clone())
            .then(block)
            .map(|((var, iter), body)| StmtKind::For { var, iter, body });

        choice((if_stmt, while_stmt, for_stmt))
            .map_with(move |kind, extra| Stmt { kind, line: lines.line(extra.span().start) })
            .or(simple_line.clone())
            .boxed()
    })
    .repeated()
    .collect()
}
