//! Tree-walking evaluator. Everything outside the script's own bindings is
//! reached through a [`Host`].

use std::collections::HashMap;
use std::rc::Rc;

use super::error::{ErrorKind, ScriptError};
use super::parser::{Expr, Program, Stmt, StmtKind};
use super::value::{binary, check_depth, compare, CallArgs, Value};

/// Intrinsic that writes to the captured output channel.
pub const PRINT: &str = "print";

/// The environment a script runs against.
pub trait Host {
    /// Whether `name` is an exposed capability.
    fn has_capability(&self, name: &str) -> bool;
    fn call(&mut self, name: &str, args: CallArgs) -> Result<Value, ScriptError>;
    fn write(&mut self, text: &str) -> Result<(), ScriptError>;
    /// Charged once per statement and loop iteration.
    fn step(&mut self) -> Result<(), ScriptError>;
    fn max_collection_len(&self) -> usize;
}

/// State left behind by a script that ran to completion.
#[derive(Debug, Default)]
pub struct Completion {
    /// Value of an executed `return`, if any.
    pub returned: Option<Value>,
    pub globals: HashMap<String, Value>,
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

pub struct Interpreter<'h> {
    host: &'h mut dyn Host,
    globals: HashMap<String, Value>,
}

impl<'h> Interpreter<'h> {
    pub fn new(host: &'h mut dyn Host) -> Self {
        Self { host, globals: HashMap::new() }
    }

    pub fn run(mut self, program: &Program) -> Result<Completion, ScriptError> {
        let returned = match self.block(&program.body)? {
            Flow::Return(value) => Some(value),
            _ => None,
        };
        Ok(Completion { returned, globals: self.globals })
    }

    fn block(&mut self, body: &[Stmt]) -> Result<Flow, ScriptError> {
        for stmt in body {
            match self.statement(stmt).map_err(|e| e.at(stmt.line))? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn statement(&mut self, stmt: &Stmt) -> Result<Flow, ScriptError> {
        self.host.step()?;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { target, value } => {
                let value = self.eval(value)?;
                self.assign(target, value)?;
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.eval(target)?;
                let rhs = self.eval(value)?;
                let value = binary(*op, &current, &rhs, self.host.max_collection_len())?;
                self.assign(target, value)?;
            }
            StmtKind::If { branches, orelse } => {
                for (condition, body) in branches {
                    if self.eval(condition)?.is_truthy() {
                        return self.block(body);
                    }
                }
                return self.block(orelse);
            }
            StmtKind::While { condition, body } => {
                while self.eval(condition)?.is_truthy() {
                    self.host.step()?;
                    match self.block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::For { var, iter, body } => {
                let items: Vec<Value> = match self.eval(iter)? {
                    Value::List(items) => items.as_ref().clone(),
                    Value::Dict(entries) => entries.iter().map(|(k, _)| Value::from(k.as_str())).collect(),
                    Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string().into())).collect(),
                    other => {
                        return Err(ScriptError::type_error(format!(
                            "'{}' object is not iterable",
                            other.type_name()
                        )))
                    }
                };
                for item in items {
                    self.host.step()?;
                    self.globals.insert(var.clone(), item);
                    match self.block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn assign(&mut self, target: &Expr, value: Value) -> Result<(), ScriptError> {
        // Flatten `root[i][j]...` and evaluate every index before borrowing
        // the root mutably.
        let mut indices = Vec::new();
        let mut cursor = target;
        while let Expr::Subscript(object, index) = cursor {
            indices.push(self.eval(index)?);
            cursor = object;
        }
        indices.reverse();
        let Expr::Name(root) = cursor else {
            return Err(ScriptError::new(ErrorKind::Syntax, "cannot assign to expression"));
        };

        // the slot sits `indices.len()` levels below the root
        check_depth(indices.len() + value.depth())?;
        if indices.is_empty() {
            self.globals.insert(root.clone(), value);
            return Ok(());
        }
        let (last, path) = indices
            .split_last()
            .ok_or_else(|| ScriptError::new(ErrorKind::Syntax, "empty assignment target"))?;
        let mut slot = match self.globals.get_mut(root) {
            Some(slot) => slot,
            None => return Err(undefined(root)),
        };
        for index in path {
            slot = index_mut(slot, index)?;
        }
        store(slot, last, value)
    }

    fn lookup(&self, name: &str) -> Result<Value, ScriptError> {
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if self.host.has_capability(name) {
            return Ok(Value::Capability(name.into()));
        }
        Err(undefined(name))
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => {
                let items = items.iter().map(|e| self.eval(e)).collect::<Result<Vec<_>, _>>()?;
                let list = Value::from(items);
                check_depth(list.depth())?;
                Ok(list)
            }
            Expr::Dict(entries) => {
                let mut out: Vec<(String, Value)> = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = match self.eval(key)? {
                        Value::Str(s) => s.to_string(),
                        other => {
                            return Err(ScriptError::type_error(format!(
                                "dict keys must be str, not {}",
                                other.type_name()
                            )))
                        }
                    };
                    let value = self.eval(value)?;
                    match out.iter_mut().find(|(k, _)| *k == key) {
                        Some(entry) => entry.1 = value,
                        None => out.push((key, value)),
                    }
                }
                let dict = Value::Dict(Rc::new(out));
                check_depth(dict.depth())?;
                Ok(dict)
            }
            Expr::Subscript(object, index) => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                get_index(&object, &index)
            }
            Expr::Call { callee, args, keywords } => {
                let args = CallArgs {
                    positional: args.iter().map(|e| self.eval(e)).collect::<Result<_, _>>()?,
                    keywords: keywords
                        .iter()
                        .map(|(k, e)| -> Result<(String, Value), ScriptError> { Ok((k.clone(), self.eval(e)?)) })
                        .collect::<Result<_, _>>()?,
                };
                self.call(callee, args)
            }
            Expr::Negate(inner) => match self.eval(inner)? {
                Value::Int(i) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| ScriptError::new(ErrorKind::Overflow, "integer result out of range")),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(ScriptError::type_error(format!(
                    "bad operand type for unary -: '{}'",
                    other.type_name()
                ))),
            },
            Expr::Plus(inner) => match self.eval(inner)? {
                value @ (Value::Int(_) | Value::Float(_)) => Ok(value),
                other => Err(ScriptError::type_error(format!(
                    "bad operand type for unary +: '{}'",
                    other.type_name()
                ))),
            },
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner)?.is_truthy())),
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, &left, &right, self.host.max_collection_len())
            }
            Expr::Compare(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                compare(*op, &left, &right).map(Value::Bool)
            }
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if !left.is_truthy() {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if left.is_truthy() {
                    return Ok(left);
                }
                self.eval(right)
            }
        }
    }

    fn call(&mut self, callee: &Expr, args: CallArgs) -> Result<Value, ScriptError> {
        // `print` is the output channel, not a binding, unless the script
        // rebinds the name itself.
        if let Expr::Name(name) = callee {
            if name == PRINT && !self.globals.contains_key(PRINT) {
                return self.print(args);
            }
        }
        match self.eval(callee)? {
            Value::Capability(name) => self.host.call(&name, args),
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn print(&mut self, args: CallArgs) -> Result<Value, ScriptError> {
        let mut sep = String::from(" ");
        let mut end = String::from("\n");
        for (key, value) in args.keywords {
            let slot = match key.as_str() {
                "sep" => &mut sep,
                "end" => &mut end,
                other => {
                    return Err(ScriptError::type_error(format!(
                        "'{other}' is an invalid keyword argument for print()"
                    )))
                }
            };
            match value {
                Value::Str(s) => *slot = s.to_string(),
                Value::None => {}
                other => {
                    return Err(ScriptError::type_error(format!(
                        "{key} must be None or a string, not {}",
                        other.type_name()
                    )))
                }
            }
        }
        let mut line = args.positional.iter().map(Value::to_string).collect::<Vec<_>>().join(&sep);
        line.push_str(&end);
        self.host.write(&line)?;
        Ok(Value::None)
    }
}

fn undefined(name: &str) -> ScriptError {
    ScriptError::name(format!("name '{name}' is not defined"))
}

fn list_position(len: usize, index: &Value) -> Result<usize, ScriptError> {
    let Value::Int(i) = index else {
        return Err(ScriptError::type_error(format!(
            "list indices must be integers, not {}",
            index.type_name()
        )));
    };
    let resolved = if *i < 0 { i.checked_add(len as i64) } else { Some(*i) };
    match resolved {
        Some(pos) if pos >= 0 && (pos as usize) < len => Ok(pos as usize),
        _ => Err(ScriptError::new(ErrorKind::Index, "list index out of range")),
    }
}

fn dict_key(index: &Value) -> Result<&str, ScriptError> {
    match index {
        Value::Str(s) => Ok(s),
        other => Err(ScriptError::type_error(format!("dict keys must be str, not {}", other.type_name()))),
    }
}

fn missing_key(key: &str) -> ScriptError {
    ScriptError::new(ErrorKind::Key, Value::from(key).repr())
}

fn get_index(object: &Value, index: &Value) -> Result<Value, ScriptError> {
    match object {
        Value::List(items) => Ok(items[list_position(items.len(), index)?].clone()),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let pos = list_position(chars.len(), index)
                .map_err(|e| ScriptError::new(e.kind, e.message.replace("list", "string")))?;
            Ok(Value::Str(chars[pos].to_string().into()))
        }
        Value::Dict(entries) => {
            let key = dict_key(index)?;
            entries
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| missing_key(key))
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn index_mut<'v>(object: &'v mut Value, index: &Value) -> Result<&'v mut Value, ScriptError> {
    match object {
        Value::List(items) => {
            let pos = list_position(items.len(), index)?;
            Ok(&mut Rc::make_mut(items)[pos])
        }
        Value::Dict(entries) => {
            let key = dict_key(index)?;
            Rc::make_mut(entries)
                .iter_mut()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v)
                .ok_or_else(|| missing_key(key))
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn store(object: &mut Value, index: &Value, value: Value) -> Result<(), ScriptError> {
    match object {
        Value::List(items) => {
            let pos = list_position(items.len(), index)?;
            Rc::make_mut(items)[pos] = value;
            Ok(())
        }
        Value::Dict(entries) => {
            let key = dict_key(index)?;
            let entries = Rc::make_mut(entries);
            match entries.iter_mut().find(|(k, _)| k == key) {
                Some(entry) => entry.1 = value,
                None => entries.push((key.to_string(), value)),
            }
            Ok(())
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse;

    /// Host exposing `double(x)` and recording output.
    #[derive(Default)]
    struct TestHost {
        output: String,
        steps: u64,
        step_limit: Option<u64>,
    }

    impl Host for TestHost {
        fn has_capability(&self, name: &str) -> bool {
            name == "double"
        }

        fn call(&mut self, name: &str, args: CallArgs) -> Result<Value, ScriptError> {
            assert_eq!(name, "double");
            let x = args.positional[0].as_number().unwrap();
            Ok(Value::Float(x * 2.0))
        }

        fn write(&mut self, text: &str) -> Result<(), ScriptError> {
            self.output.push_str(text);
            Ok(())
        }

        fn step(&mut self) -> Result<(), ScriptError> {
            self.steps += 1;
            match self.step_limit {
                Some(limit) if self.steps > limit => {
                    Err(ScriptError::resource(crate::script::error::Resource::Steps))
                }
                _ => Ok(()),
            }
        }

        fn max_collection_len(&self) -> usize {
            1_000
        }
    }

    fn run(source: &str) -> (Result<Completion, ScriptError>, String) {
        let program = parse(source).unwrap();
        let mut host = TestHost::default();
        let result = Interpreter::new(&mut host).run(&program);
        (result, host.output)
    }

    fn global(source: &str, name: &str) -> Value {
        let (result, _) = run(source);
        result.unwrap().globals.remove(name).unwrap()
    }

    #[test]
    fn print_formats_like_python() {
        let (_, output) = run("print('a', 1, 2.0, [1, 'b'], None, True)\nprint(1, 2, sep='-', end='!')");
        assert_eq!(output, "a 1 2.0 [1, 'b'] None True\n1-2!");
    }

    #[test]
    fn loops_and_conditionals() {
        let source = "total = 0\nfor x in [1, 2, 3, 4, 5]:\n    if x % 2 == 0:\n        continue\n    total += x\n";
        assert_eq!(global(source, "total"), Value::Int(9));
        let source = "n = 0\nwhile True:\n    n += 1\n    if n >= 3:\n        break\n";
        assert_eq!(global(source, "n"), Value::Int(3));
    }

    #[test]
    fn capabilities_resolve_through_the_host() {
        assert_eq!(global("y = double(2.5)", "y"), Value::Float(5.0));
        assert_eq!(global("f = double\ny = f(1)", "y"), Value::Float(2.0));
    }

    #[test]
    fn unknown_names_are_name_errors_with_lines() {
        let (result, _) = run("x = 1\ny = open('file')\n");
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Name);
        assert_eq!(err.line, Some(2));
        assert_eq!(err.to_string(), "line 2: NameError: name 'open' is not defined");
    }

    #[test]
    fn nested_subscript_assignment_copies_on_write() {
        let source = "a = {'xs': [1, 2]}\nb = a\nb['xs'][0] = 9\nb['new'] = 'v'\n";
        let (result, _) = run(source);
        let globals = result.unwrap().globals;
        assert_eq!(globals["a"].to_string(), "{'xs': [1, 2]}");
        assert_eq!(globals["b"].to_string(), "{'xs': [9, 2], 'new': 'v'}");
    }

    #[test]
    fn negative_indices_and_errors() {
        assert_eq!(global("x = [1, 2, 3][-1]", "x"), Value::Int(3));
        let (result, _) = run("x = [1][5]");
        assert_eq!(result.unwrap_err().kind, ErrorKind::Index);
        let (result, _) = run("x = {'a': 1}['b']");
        assert_eq!(result.unwrap_err().message, "'b'");
    }

    #[test]
    fn return_stops_execution() {
        let (result, output) = run("print('before')\nreturn {'ok': True}\nprint('after')\n");
        let completion = result.unwrap();
        assert_eq!(completion.returned.unwrap().to_string(), "{'ok': True}");
        assert_eq!(output, "before\n");
    }

    #[test]
    fn step_budget_stops_infinite_loops() {
        let program = parse("while True:\n    pass\n").unwrap();
        let mut host = TestHost { step_limit: Some(100), ..Default::default() };
        let err = Interpreter::new(&mut host).run(&program).unwrap_err();
        assert_eq!(err.resource_kind(), Some(crate::script::error::Resource::Steps));
    }

    #[test]
    fn short_circuit_skips_right_operand() {
        assert_eq!(global("x = False and missing_name", "x"), Value::Bool(false));
        assert_eq!(global("x = 0 or 'fallback'", "x"), Value::from("fallback"));
    }

    #[test]
    fn nesting_ceiling_applies_to_literals_and_stores() {
        let (result, _) = run("x = []\nn = 0\nwhile n < 1000000:\n    x = [x]\n    n += 1\n");
        let err = result.unwrap_err();
        assert_eq!(err.resource_kind(), Some(crate::script::Resource::Memory));
        assert_eq!(err.line, Some(4));

        let (result, _) = run("x = {'k': 0}\nn = 0\nwhile n < 1000000:\n    x = {'k': x}\n    n += 1\n");
        assert_eq!(result.unwrap_err().resource_kind(), Some(crate::script::Resource::Memory));

        let (result, _) = run("x = [0]\nn = 0\nwhile n < 1000000:\n    x[0] = x\n    n += 1\n");
        let err = result.unwrap_err();
        assert_eq!(err.resource_kind(), Some(crate::script::Resource::Memory));
        assert_eq!(err.line, Some(4));
    }

    #[test]
    fn calling_a_non_function_is_a_type_error() {
        let (result, _) = run("x = 3\nx()\n");
        assert_eq!(result.unwrap_err().kind, ErrorKind::Type);
    }
}
