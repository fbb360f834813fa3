//! Tree-walking evaluator
//!
//! Scoping is a stack of frames. Arrow functions run in a fresh frame pushed
//! on top of the caller's stack, so they see the variables in scope where
//! they are called. Every statement and loop iteration costs one step from a
//! fixed budget; call depth and expression nesting are capped separately.
//! Strings and arrays are capped in size, so a loop that doubles a value
//! fails with a `RangeError` instead of exhausting memory.

use super::ast::{
    AssignOp, BinaryOp, Expr, Lambda, LambdaBody, LogicalOp, Pattern, Stmt, TemplatePart,
    UnaryOp,
};
use super::value::{number_to_string, Native, Value};
use crate::error::{EvalError, EvalResult};
use indexmap::IndexMap;
use std::collections::HashMap;

const MAX_CALL_DEPTH: usize = 64;
const MAX_NESTING: usize = 512;
const MAX_ARRAY_LEN: usize = 100_000;
const MAX_STRING_LEN: usize = 1 << 20;

struct Binding {
    value: Value,
    constant: bool,
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

enum Key {
    Name(String),
    Index(f64),
}

pub(crate) struct Interpreter {
    scopes: Vec<HashMap<String, Binding>>,
    steps: usize,
    budget: usize,
    depth: usize,
    nesting: usize,
}

fn type_error(message: impl Into<String>) -> EvalError {
    EvalError::Type(message.into())
}

fn stack_overflow() -> EvalError {
    EvalError::Thrown("RangeError: Maximum call stack size exceeded".to_string())
}

fn check_string_len(len: usize) -> EvalResult<()> {
    if len > MAX_STRING_LEN {
        return Err(EvalError::Thrown("RangeError: Invalid string length".to_string()));
    }
    Ok(())
}

fn check_array_len(len: usize) -> EvalResult<()> {
    if len > MAX_ARRAY_LEN {
        return Err(EvalError::Thrown("RangeError: Invalid array length".to_string()));
    }
    Ok(())
}

/// Reject a freshly built value that outgrew the size caps
fn checked(value: Value) -> EvalResult<Value> {
    match &value {
        Value::Str(s) => check_string_len(s.len())?,
        Value::Array(items) => check_array_len(items.len())?,
        _ => {}
    }
    Ok(value)
}

fn native_object(entries: &[(&str, Native)]) -> Value {
    Value::Object(
        entries
            .iter()
            .map(|(name, native)| ((*name).to_string(), Value::Native(*native)))
            .collect(),
    )
}

/// Source-like name of an expression, for error messages
fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::Member {
            object, property, ..
        } => format!("{}.{property}", describe(object)),
        Expr::Index { object, .. } => format!("{}[...]", describe(object)),
        Expr::Call { callee, .. } => format!("{}(...)", describe(callee)),
        _ => "expression".to_string(),
    }
}

impl Interpreter {
    pub(crate) fn new(budget: usize) -> Self {
        let mut globals = HashMap::new();
        let mut global = |name: &str, value: Value| {
            globals.insert(
                name.to_string(),
                Binding {
                    value,
                    constant: true,
                },
            );
        };
        global("String", Value::Native(Native::String));
        global("Number", Value::Native(Native::Number));
        global("Boolean", Value::Native(Native::Boolean));
        global("parseInt", Value::Native(Native::ParseInt));
        global("JSON", native_object(&[("stringify", Native::JsonStringify)]));
        global(
            "Object",
            native_object(&[
                ("keys", Native::ObjectKeys),
                ("values", Native::ObjectValues),
                ("entries", Native::ObjectEntries),
            ]),
        );
        global("Array", native_object(&[("isArray", Native::ArrayIsArray)]));
        global(
            "Math",
            native_object(&[
                ("max", Native::MathMax),
                ("min", Native::MathMin),
                ("floor", Native::MathFloor),
                ("ceil", Native::MathCeil),
                ("round", Native::MathRound),
                ("abs", Native::MathAbs),
            ]),
        );
        Self {
            scopes: vec![globals],
            steps: 0,
            budget,
            depth: 0,
            nesting: 0,
        }
    }

    fn tick(&mut self) -> EvalResult<()> {
        self.steps += 1;
        if self.steps > self.budget {
            return Err(EvalError::BudgetExceeded(self.budget));
        }
        Ok(())
    }

    // ---- bindings ----

    fn declare(&mut self, name: &str, value: Value, constant: bool) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), Binding { value, constant });
        }
    }

    fn lookup(&self, name: &str) -> EvalResult<Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .map(|binding| binding.value.clone())
            .ok_or_else(|| EvalError::Reference(format!("{name} is not defined")))
    }

    fn binding_mut(&mut self, name: &str) -> EvalResult<&mut Binding> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.get_mut(name))
            .ok_or_else(|| EvalError::Reference(format!("{name} is not defined")))
    }

    fn bind_pattern(&mut self, pattern: &Pattern, value: Value, constant: bool) -> EvalResult<()> {
        match pattern {
            Pattern::Ident(name) => {
                self.declare(name, value, constant);
                Ok(())
            }
            Pattern::Object(fields) => {
                if value.is_nullish() {
                    return Err(type_error(format!(
                        "Cannot destructure '{}' as it is {}.",
                        value.to_js_string(),
                        value.to_js_string()
                    )));
                }
                for field in fields {
                    let mut item = get_property(&value, &field.key, false)?;
                    if matches!(item, Value::Undefined) {
                        if let Some(default) = &field.default {
                            item = self.eval(default)?;
                        }
                    }
                    self.declare(&field.local, item, constant);
                }
                Ok(())
            }
        }
    }

    // ---- functions ----

    pub(crate) fn call_lambda(&mut self, lambda: &Lambda, args: Vec<Value>) -> EvalResult<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(stack_overflow());
        }
        self.depth += 1;
        self.scopes.push(HashMap::new());
        let result = self.run_lambda(lambda, args);
        self.scopes.pop();
        self.depth -= 1;
        result
    }

    fn run_lambda(&mut self, lambda: &Lambda, args: Vec<Value>) -> EvalResult<Value> {
        let mut args = args.into_iter();
        for param in &lambda.params {
            let value = args.next().unwrap_or(Value::Undefined);
            self.bind_pattern(param, value, false)?;
        }
        match &lambda.body {
            LambdaBody::Expr(expr) => self.eval(expr),
            LambdaBody::Block(body) => match self.exec_all(body)? {
                Flow::Return(value) => Ok(value),
                Flow::Normal | Flow::Break | Flow::Continue => Ok(Value::Undefined),
            },
        }
    }

    fn call_value(&mut self, callee: &Value, args: Vec<Value>, name: &str) -> EvalResult<Value> {
        match callee {
            Value::Lambda(lambda) => {
                let lambda = lambda.clone();
                self.call_lambda(&lambda, args)
            }
            Value::Native(native) => call_native(*native, &args),
            _ => Err(type_error(format!("{name} is not a function"))),
        }
    }

    // ---- statements ----

    fn exec_all(&mut self, body: &[Stmt]) -> EvalResult<Flow> {
        for stmt in body {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_block(&mut self, body: &[Stmt]) -> EvalResult<Flow> {
        self.scopes.push(HashMap::new());
        let flow = self.exec_all(body);
        self.scopes.pop();
        flow
    }

    fn exec(&mut self, stmt: &Stmt) -> EvalResult<Flow> {
        self.tick()?;
        self.enter()?;
        let flow = self.exec_stmt(stmt);
        self.nesting -= 1;
        flow
    }

    fn enter(&mut self) -> EvalResult<()> {
        if self.nesting >= MAX_NESTING {
            return Err(stack_overflow());
        }
        self.nesting += 1;
        Ok(())
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> EvalResult<Flow> {
        match stmt {
            Stmt::Declare { constant, decls } => {
                for (pattern, init) in decls {
                    let value = match init {
                        Some(expr) => self.eval(expr)?,
                        None => Value::Undefined,
                    };
                    self.bind_pattern(pattern, value, *constant)?;
                }
                Ok(Flow::Normal)
            }
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(Flow::Normal)
            }
            Stmt::If {
                test,
                then,
                otherwise,
            } => {
                if self.eval(test)?.truthy() {
                    self.exec_block(then)
                } else {
                    self.exec_block(otherwise)
                }
            }
            Stmt::ForOf {
                binding,
                iterable,
                body,
            } => {
                let items = match self.eval(iterable)? {
                    Value::Array(items) => items,
                    Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
                    other => {
                        return Err(type_error(format!(
                            "{} is not iterable",
                            describe_value(&other, iterable)
                        )))
                    }
                };
                for item in items {
                    self.tick()?;
                    self.scopes.push(HashMap::new());
                    let flow = self
                        .bind_pattern(binding, item, false)
                        .and_then(|()| self.exec_all(body));
                    self.scopes.pop();
                    match flow? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                self.scopes.push(HashMap::new());
                let flow = self.run_for(init.as_deref(), test.as_ref(), update.as_ref(), body);
                self.scopes.pop();
                flow
            }
            Stmt::While { test, body } => {
                while self.eval(test)?.truthy() {
                    self.tick()?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Block(body) => self.exec_block(body),
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Throw(expr) => {
                let value = self.eval(expr)?;
                let message = match &value {
                    Value::Object(map) => map
                        .get("message")
                        .map_or_else(|| value.to_js_string(), Value::to_js_string),
                    other => other.to_js_string(),
                };
                Err(EvalError::Thrown(message))
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
        }
    }

    fn run_for(
        &mut self,
        init: Option<&Stmt>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &[Stmt],
    ) -> EvalResult<Flow> {
        if let Some(init) = init {
            self.exec(init)?;
        }
        loop {
            self.tick()?;
            if let Some(test) = test {
                if !self.eval(test)?.truthy() {
                    break;
                }
            }
            match self.exec_block(body)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
            if let Some(update) = update {
                self.eval(update)?;
            }
        }
        Ok(Flow::Normal)
    }

    // ---- expressions ----

    pub(crate) fn eval(&mut self, expr: &Expr) -> EvalResult<Value> {
        self.enter()?;
        let value = self.eval_expr(expr);
        self.nesting -= 1;
        value
    }

    fn eval_expr(&mut self, expr: &Expr) -> EvalResult<Value> {
        match expr {
            Expr::Num(n) => Ok(Value::Num(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Expr(expr) => out.push_str(&self.eval(expr)?.to_js_string()),
                    }
                    check_string_len(out.len())?;
                }
                Ok(Value::Str(out))
            }
            Expr::Ident(name) => self.lookup(name),
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?);
                }
                Ok(Value::Array(out))
            }
            Expr::Object(entries) => {
                let mut out = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    let value = self.eval(value)?;
                    out.insert(key.clone(), value);
                }
                Ok(Value::Object(out))
            }
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let target = self.eval(object)?;
                get_property(&target, property, *optional)
            }
            Expr::Index { object, index } => {
                let target = self.eval(object)?;
                let index = self.eval(index)?;
                get_index(&target, &index)
            }
            Expr::Call { callee, args } => self.eval_call(callee, args),
            Expr::New { class, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                match class.as_str() {
                    "Error" | "TypeError" | "RangeError" => {
                        let message = values
                            .first()
                            .filter(|v| !matches!(v, Value::Undefined))
                            .map(Value::to_js_string)
                            .unwrap_or_default();
                        let mut map = IndexMap::new();
                        map.insert("name".to_string(), Value::Str(class.clone()));
                        map.insert("message".to_string(), Value::Str(message));
                        Ok(Value::Object(map))
                    }
                    _ => Err(type_error(format!("{class} is not a constructor"))),
                }
            }
            Expr::Unary { op, expr } => {
                let value = match (op, expr.as_ref()) {
                    // `typeof missing` is "undefined", not a ReferenceError.
                    (UnaryOp::TypeOf, Expr::Ident(name)) => {
                        self.lookup(name).unwrap_or(Value::Undefined)
                    }
                    _ => self.eval(expr)?,
                };
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.truthy()),
                    UnaryOp::Neg => Value::Num(-value.to_number()),
                    UnaryOp::Plus => Value::Num(value.to_number()),
                    UnaryOp::TypeOf => Value::Str(value.type_of().to_string()),
                })
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, &left, &right)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.truthy(),
                    LogicalOp::Or => left.truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Conditional {
                test,
                then,
                otherwise,
            } => {
                if self.eval(test)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Assign { op, target, value } => {
                let rhs = self.eval(value)?;
                let value = match op {
                    AssignOp::Assign => rhs,
                    AssignOp::Add => binary(BinaryOp::Add, &self.eval(target)?, &rhs)?,
                    AssignOp::Sub => binary(BinaryOp::Sub, &self.eval(target)?, &rhs)?,
                };
                self.assign(target, value.clone())?;
                Ok(value)
            }
            Expr::Update {
                target,
                delta,
                prefix,
            } => {
                let old = self.eval(target)?.to_number();
                let new = old + delta;
                self.assign(target, Value::Num(new))?;
                Ok(Value::Num(if *prefix { new } else { old }))
            }
            Expr::Lambda(lambda) => Ok(Value::Lambda(lambda.clone())),
        }
    }

    fn eval_args(&mut self, args: &[Expr]) -> EvalResult<Vec<Value>> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr]) -> EvalResult<Value> {
        let Expr::Member {
            object, property, ..
        } = callee
        else {
            let function = self.eval(callee)?;
            let args = self.eval_args(args)?;
            return self.call_value(&function, args, &describe(callee));
        };

        // Mutating array methods write back through the receiver's place.
        if matches!(property.as_str(), "push" | "pop" | "unshift" | "shift") {
            let args = self.eval_args(args)?;
            let receiver = self.place(object)?;
            let Value::Array(items) = receiver else {
                return Err(type_error(format!("{} is not a function", describe(callee))));
            };
            check_array_len(items.len() + args.len())?;
            return Ok(match property.as_str() {
                "push" => {
                    items.extend(args);
                    Value::Num(items.len() as f64)
                }
                "unshift" => {
                    for (i, arg) in args.into_iter().enumerate() {
                        items.insert(i, arg);
                    }
                    Value::Num(items.len() as f64)
                }
                "pop" => items.pop().unwrap_or(Value::Undefined),
                _ => {
                    if items.is_empty() {
                        Value::Undefined
                    } else {
                        items.remove(0)
                    }
                }
            });
        }

        let receiver = self.eval(object)?;
        let args = self.eval_args(args)?;
        if let Value::Object(map) = &receiver {
            if let Some(function) = map.get(property) {
                let function = function.clone();
                return self.call_value(&function, args, &describe(callee));
            }
        }
        self.call_method(&receiver, property, args, callee)
    }

    fn call_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        callee: &Expr,
    ) -> EvalResult<Value> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);
        let not_a_function = || type_error(format!("{} is not a function", describe(callee)));
        match receiver {
            Value::Str(s) => string_method(s, name, &args)?.ok_or_else(not_a_function),
            Value::Array(items) => {
                if let Some(value) = array_method(items, name, &args)? {
                    return Ok(value);
                }
                let callback = arg(0);
                if !matches!(callback, Value::Lambda(_) | Value::Native(_))
                    && matches!(
                        name,
                        "map" | "filter" | "forEach" | "some" | "every" | "find" | "findIndex"
                    )
                {
                    return Err(type_error(format!(
                        "{} is not a function",
                        callback.to_js_string()
                    )));
                }
                match name {
                    "map" => {
                        let mut out = Vec::with_capacity(items.len());
                        for (i, item) in items.iter().enumerate() {
                            self.tick()?;
                            out.push(self.call_value(
                                &callback,
                                vec![item.clone(), Value::Num(i as f64)],
                                name,
                            )?);
                        }
                        Ok(Value::Array(out))
                    }
                    "filter" => {
                        let mut out = Vec::new();
                        for (i, item) in items.iter().enumerate() {
                            self.tick()?;
                            if self
                                .call_value(&callback, vec![item.clone(), Value::Num(i as f64)], name)?
                                .truthy()
                            {
                                out.push(item.clone());
                            }
                        }
                        Ok(Value::Array(out))
                    }
                    "forEach" => {
                        for (i, item) in items.iter().enumerate() {
                            self.tick()?;
                            self.call_value(&callback, vec![item.clone(), Value::Num(i as f64)], name)?;
                        }
                        Ok(Value::Undefined)
                    }
                    "some" | "every" | "find" | "findIndex" => {
                        for (i, item) in items.iter().enumerate() {
                            self.tick()?;
                            let hit = self
                                .call_value(&callback, vec![item.clone(), Value::Num(i as f64)], name)?
                                .truthy();
                            match (name, hit) {
                                ("some", true) => return Ok(Value::Bool(true)),
                                ("every", false) => return Ok(Value::Bool(false)),
                                ("find", true) => return Ok(item.clone()),
                                ("findIndex", true) => return Ok(Value::Num(i as f64)),
                                _ => {}
                            }
                        }
                        Ok(match name {
                            "some" => Value::Bool(false),
                            "every" => Value::Bool(true),
                            "find" => Value::Undefined,
                            _ => Value::Num(-1.0),
                        })
                    }
                    _ => Err(not_a_function()),
                }
            }
            Value::Num(n) => match name {
                "toFixed" => {
                    let digits = arg(0).to_number();
                    let digits = if digits.is_nan() { 0.0 } else { digits.clamp(0.0, 20.0) };
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let digits = digits as usize;
                    Ok(Value::Str(format!("{n:.digits$}")))
                }
                "toString" => Ok(Value::Str(number_to_string(*n))),
                _ => Err(not_a_function()),
            },
            Value::Undefined | Value::Null => Err(type_error(format!(
                "Cannot read properties of {} (reading '{name}')",
                receiver.to_js_string()
            ))),
            _ if name == "toString" => Ok(Value::Str(receiver.to_js_string())),
            _ => Err(not_a_function()),
        }
    }

    // ---- assignment ----

    fn resolve_path(&mut self, target: &Expr) -> EvalResult<(String, Vec<Key>)> {
        match target {
            Expr::Ident(name) => Ok((name.clone(), Vec::new())),
            Expr::Member {
                object, property, ..
            } => {
                let (root, mut path) = self.resolve_path(object)?;
                path.push(Key::Name(property.clone()));
                Ok((root, path))
            }
            Expr::Index { object, index } => {
                let (root, mut path) = self.resolve_path(object)?;
                let key = match self.eval(index)? {
                    Value::Num(n) => Key::Index(n),
                    other => Key::Name(other.to_js_string()),
                };
                path.push(key);
                Ok((root, path))
            }
            other => Err(type_error(format!(
                "{} is not assignable",
                describe(other)
            ))),
        }
    }

    fn place(&mut self, target: &Expr) -> EvalResult<&mut Value> {
        let (root, path) = self.resolve_path(target)?;
        let binding = self.binding_mut(&root)?;
        let mut slot = &mut binding.value;
        for key in &path {
            slot = match (slot, key) {
                (Value::Object(map), Key::Name(name)) => {
                    map.entry(name.clone()).or_insert(Value::Undefined)
                }
                (Value::Object(map), Key::Index(n)) => map
                    .entry(number_to_string(*n))
                    .or_insert(Value::Undefined),
                (Value::Array(items), Key::Index(n)) => {
                    if !(*n >= 0.0 && n.fract() == 0.0 && *n < MAX_ARRAY_LEN as f64) {
                        return Err(cannot_set("object", key));
                    }
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let i = *n as usize;
                    if i >= items.len() {
                        items.resize(i + 1, Value::Undefined);
                    }
                    &mut items[i]
                }
                (other, key) => return Err(cannot_set(other.type_of(), key)),
            };
        }
        Ok(slot)
    }

    fn assign(&mut self, target: &Expr, value: Value) -> EvalResult<()> {
        if let Expr::Ident(name) = target {
            let binding = self.binding_mut(name)?;
            if binding.constant {
                return Err(type_error("Assignment to constant variable."));
            }
            binding.value = value;
            return Ok(());
        }
        *self.place(target)? = value;
        Ok(())
    }
}

fn cannot_set(type_of: &str, key: &Key) -> EvalError {
    let key = match key {
        Key::Name(name) => name.clone(),
        Key::Index(n) => number_to_string(*n),
    };
    type_error(format!("Cannot set properties of {type_of} (setting '{key}')"))
}

fn describe_value(value: &Value, expr: &Expr) -> String {
    match expr {
        Expr::Ident(_) | Expr::Member { .. } => describe(expr),
        _ => value.to_js_string(),
    }
}

fn get_property(target: &Value, name: &str, optional: bool) -> EvalResult<Value> {
    Ok(match target {
        Value::Undefined | Value::Null if optional => Value::Undefined,
        Value::Undefined | Value::Null => {
            return Err(type_error(format!(
                "Cannot read properties of {} (reading '{name}')",
                target.to_js_string()
            )))
        }
        Value::Str(s) if name == "length" => Value::Num(s.chars().count() as f64),
        Value::Array(items) if name == "length" => Value::Num(items.len() as f64),
        Value::Object(map) => map.get(name).cloned().unwrap_or(Value::Undefined),
        _ => Value::Undefined,
    })
}

fn get_index(target: &Value, index: &Value) -> EvalResult<Value> {
    let position = match index {
        Value::Num(n) if *n >= 0.0 && n.fract() == 0.0 => {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let i = *n as usize;
            Some(i)
        }
        _ => None,
    };
    match (target, position) {
        (Value::Array(items), Some(i)) => Ok(items.get(i).cloned().unwrap_or(Value::Undefined)),
        (Value::Str(s), Some(i)) => Ok(s
            .chars()
            .nth(i)
            .map_or(Value::Undefined, |c| Value::Str(c.to_string()))),
        _ => get_property(target, &index.to_js_string(), false),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> EvalResult<Value> {
    let concat = |l: &Value, r: &Value| {
        matches!(l, Value::Str(_) | Value::Array(_) | Value::Object(_))
            || matches!(r, Value::Str(_) | Value::Array(_) | Value::Object(_))
    };
    let compare = |l: &Value, r: &Value| -> Option<std::cmp::Ordering> {
        match (l, r) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => l.to_number().partial_cmp(&r.to_number()),
        }
    };
    Ok(match op {
        BinaryOp::Add if concat(left, right) => {
            let (left, right) = (left.to_js_string(), right.to_js_string());
            check_string_len(left.len() + right.len())?;
            Value::Str(left + &right)
        }
        BinaryOp::Add => Value::Num(left.to_number() + right.to_number()),
        BinaryOp::Sub => Value::Num(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Num(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Num(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Num(left.to_number() % right.to_number()),
        BinaryOp::StrictEq => Value::Bool(left.strict_eq(right)),
        BinaryOp::StrictNe => Value::Bool(!left.strict_eq(right)),
        BinaryOp::LooseEq => Value::Bool(left.loose_eq(right)),
        BinaryOp::LooseNe => Value::Bool(!left.loose_eq(right)),
        BinaryOp::Lt => Value::Bool(compare(left, right).is_some_and(|o| o.is_lt())),
        BinaryOp::Le => Value::Bool(compare(left, right).is_some_and(|o| o.is_le())),
        BinaryOp::Gt => Value::Bool(compare(left, right).is_some_and(|o| o.is_gt())),
        BinaryOp::Ge => Value::Bool(compare(left, right).is_some_and(|o| o.is_ge())),
    })
}

fn js_slice_bounds(len: usize, start: &Value, end: &Value) -> (usize, usize) {
    #[allow(clippy::cast_precision_loss)]
    let len_f = len as f64;
    let clamp = |v: &Value, default: f64| -> usize {
        let n = if matches!(v, Value::Undefined) {
            default
        } else {
            v.to_number()
        };
        let n = if n.is_nan() { 0.0 } else { n.trunc() };
        let n = if n < 0.0 { (len_f + n).max(0.0) } else { n.min(len_f) };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let n = n as usize;
        n
    };
    let start = clamp(start, 0.0);
    let end = clamp(end, len_f);
    (start, end.max(start))
}

fn string_method(s: &str, name: &str, args: &[Value]) -> EvalResult<Option<Value>> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);
    let text = |i: usize| arg(i).to_js_string();
    let chars: Vec<char> = s.chars().collect();
    let value = match name {
        "trim" => Value::Str(s.trim().to_string()),
        "trimStart" => Value::Str(s.trim_start().to_string()),
        "trimEnd" => Value::Str(s.trim_end().to_string()),
        "toUpperCase" => Value::Str(s.to_uppercase()),
        "toLowerCase" => Value::Str(s.to_lowercase()),
        "toString" => Value::Str(s.to_string()),
        "includes" => Value::Bool(s.contains(&text(0))),
        "startsWith" => Value::Bool(s.starts_with(&text(0))),
        "endsWith" => Value::Bool(s.ends_with(&text(0))),
        "indexOf" => Value::Num(
            s.find(&text(0))
                .map_or(-1.0, |byte| s[..byte].chars().count() as f64),
        ),
        "split" => match arg(0) {
            Value::Undefined => Value::Array(vec![Value::Str(s.to_string())]),
            sep => {
                let sep = sep.to_js_string();
                if sep.is_empty() {
                    Value::Array(chars.iter().map(|c| Value::Str(c.to_string())).collect())
                } else {
                    Value::Array(s.split(sep.as_str()).map(|p| Value::Str(p.to_string())).collect())
                }
            }
        },
        "replace" => {
            let (from, to) = (text(0), text(1));
            check_string_len(s.len() + to.len())?;
            Value::Str(s.replacen(&from, &to, 1))
        }
        "replaceAll" => {
            let (from, to) = (text(0), text(1));
            let hits = if from.is_empty() {
                chars.len() + 1
            } else {
                s.matches(from.as_str()).count()
            };
            check_string_len(s.len().saturating_add(hits.saturating_mul(to.len())))?;
            Value::Str(s.replace(&from, &to))
        }
        "slice" | "substring" => {
            let (start, end) = js_slice_bounds(chars.len(), &arg(0), &arg(1));
            Value::Str(chars[start..end].iter().collect())
        }
        "charAt" => {
            let (start, _) = js_slice_bounds(chars.len(), &arg(0), &Value::Undefined);
            Value::Str(chars.get(start).map(ToString::to_string).unwrap_or_default())
        }
        "repeat" => {
            let n = arg(0).to_number();
            let n = if n.is_nan() || n < 0.0 { 0.0 } else { n.min(10_000.0) };
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let n = n as usize;
            check_string_len(s.len().saturating_mul(n))?;
            Value::Str(s.repeat(n))
        }
        "padStart" | "padEnd" => {
            let width = arg(0).to_number();
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let width = if width.is_nan() { 0 } else { width.clamp(0.0, 10_000.0) as usize };
            let fill = match arg(1) {
                Value::Undefined => " ".to_string(),
                v => v.to_js_string(),
            };
            if chars.len() >= width || fill.is_empty() {
                Value::Str(s.to_string())
            } else {
                let pad: String = fill.chars().cycle().take(width - chars.len()).collect();
                if name == "padStart" {
                    Value::Str(format!("{pad}{s}"))
                } else {
                    Value::Str(format!("{s}{pad}"))
                }
            }
        }
        "concat" => {
            let out: String = std::iter::once(s.to_string())
                .chain(args.iter().map(Value::to_js_string))
                .collect();
            check_string_len(out.len())?;
            Value::Str(out)
        }
        _ => return Ok(None),
    };
    checked(value).map(Some)
}

fn array_method(items: &[Value], name: &str, args: &[Value]) -> EvalResult<Option<Value>> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);
    let value = match name {
        "join" => {
            let sep = match arg(0) {
                Value::Undefined => ",".to_string(),
                v => v.to_js_string(),
            };
            let parts: Vec<String> = items
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_js_string() })
                .collect();
            let len = parts.iter().map(String::len).sum::<usize>()
                + sep.len().saturating_mul(parts.len().saturating_sub(1));
            check_string_len(len)?;
            Value::Str(parts.join(&sep))
        }
        "includes" => Value::Bool(items.iter().any(|v| v.strict_eq(&arg(0)))),
        "indexOf" => Value::Num(
            items
                .iter()
                .position(|v| v.strict_eq(&arg(0)))
                .map_or(-1.0, |i| i as f64),
        ),
        "slice" => {
            let (start, end) = js_slice_bounds(items.len(), &arg(0), &arg(1));
            Value::Array(items[start..end].to_vec())
        }
        "concat" => {
            let len = args.iter().fold(items.len(), |len, extra| match extra {
                Value::Array(more) => len + more.len(),
                _ => len + 1,
            });
            check_array_len(len)?;
            let mut out = items.to_vec();
            for extra in args {
                match extra {
                    Value::Array(more) => out.extend(more.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Value::Array(out)
        }
        "reverse" => Value::Array(items.iter().rev().cloned().collect()),
        "toString" => Value::Str(Value::Array(items.to_vec()).to_js_string()),
        _ => return Ok(None),
    };
    checked(value).map(Some)
}

fn call_native(native: Native, args: &[Value]) -> EvalResult<Value> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);
    let numbers = || args.iter().map(Value::to_number);
    Ok(match native {
        Native::String => Value::Str(if args.is_empty() {
            String::new()
        } else {
            arg(0).to_js_string()
        }),
        Native::Number => Value::Num(if args.is_empty() { 0.0 } else { arg(0).to_number() }),
        Native::Boolean => Value::Bool(arg(0).truthy()),
        Native::ParseInt => {
            let text = arg(0).to_js_string();
            let text = text.trim();
            let digits: String = text
                .char_indices()
                .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+')))
                .map(|(_, c)| c)
                .collect();
            Value::Num(digits.parse::<f64>().unwrap_or(f64::NAN))
        }
        Native::JsonStringify => match arg(0).to_json() {
            None => Value::Undefined,
            Some(json) => {
                let pretty = match arg(2) {
                    Value::Num(n) => n > 0.0,
                    Value::Str(s) => !s.is_empty(),
                    _ => false,
                };
                let text = if pretty {
                    serde_json::to_string_pretty(&json)
                } else {
                    serde_json::to_string(&json)
                };
                Value::Str(text.map_err(|e| type_error(e.to_string()))?)
            }
        },
        Native::ObjectKeys | Native::ObjectValues | Native::ObjectEntries => {
            let entries: Vec<(String, Value)> = match arg(0) {
                Value::Object(map) => map.into_iter().collect(),
                Value::Array(items) => items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), v))
                    .collect(),
                Value::Undefined | Value::Null => {
                    return Err(type_error("Cannot convert undefined or null to object"))
                }
                _ => Vec::new(),
            };
            Value::Array(
                entries
                    .into_iter()
                    .map(|(k, v)| match native {
                        Native::ObjectKeys => Value::Str(k),
                        Native::ObjectValues => v,
                        _ => Value::Array(vec![Value::Str(k), v]),
                    })
                    .collect(),
            )
        }
        Native::ArrayIsArray => Value::Bool(matches!(arg(0), Value::Array(_))),
        Native::MathMax => Value::Num(numbers().fold(f64::NEG_INFINITY, f64::max)),
        Native::MathMin => Value::Num(numbers().fold(f64::INFINITY, f64::min)),
        Native::MathFloor => Value::Num(arg(0).to_number().floor()),
        Native::MathCeil => Value::Num(arg(0).to_number().ceil()),
        Native::MathRound => Value::Num((arg(0).to_number() + 0.5).floor()),
        Native::MathAbs => Value::Num(arg(0).to_number().abs()),
    })
}
