use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::{
    ast::{
        AssignOp, Block, ExceptClause, Expr, ExprKind, FormatString, ImportNames, InfixOp, Literal,
        PrefixOp, Program, Stmt, StmtKind,
    },
    diagnostics::{Diagnostic, NyxError, Result, SourceSpan},
    environment::{Environment, EnvironmentRef},
    lexer::{Lexer, LexerOptions},
    parser::{self, ParserOptions},
    registry::TokenRegistry,
    value::{
        BoundMethod, Builtin, BuiltinFn, HashKey, Instance, NyxClass, UserFunction, Value, ValueKind,
    },
};

#[derive(Debug, Clone)]
pub struct InterpreterOptions {
    /// Evaluation steps allowed per `eval` call.
    pub max_steps: usize,
    /// Nested user function calls allowed before evaluation fails.
    pub max_call_depth: usize,
    /// Fail on AST nodes the evaluator has no rule for instead of yielding null.
    pub strict_unknown_nodes: bool,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            max_steps: 1_000_000,
            max_call_depth: 256,
            strict_unknown_nodes: false,
        }
    }
}

/// Maps a module name to its exports, or `None` when it does not know it.
pub type ModuleResolver = Box<dyn Fn(&str) -> Option<IndexMap<String, Value>>>;

/// Outcome of executing a statement.
#[derive(Debug, Clone)]
pub enum ControlFlow {
    Normal(Value),
    Return(Value),
    Break,
    Continue,
}

pub struct Interpreter {
    registry: TokenRegistry,
    lexer_options: LexerOptions,
    parser_options: ParserOptions,
    options: InterpreterOptions,
    globals: EnvironmentRef,
    env: EnvironmentRef,
    builtins: IndexMap<String, Value>,
    modules: IndexMap<String, IndexMap<String, Value>>,
    resolvers: Vec<ModuleResolver>,
    module_cache: IndexMap<String, Value>,
    steps: usize,
    call_depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_options(InterpreterOptions::default())
    }

    pub fn with_options(options: InterpreterOptions) -> Self {
        let globals = Environment::new();
        let mut interpreter = Self {
            registry: TokenRegistry::default(),
            lexer_options: LexerOptions::default(),
            parser_options: ParserOptions::default(),
            options,
            env: Rc::clone(&globals),
            globals,
            builtins: IndexMap::new(),
            modules: IndexMap::new(),
            resolvers: Vec::new(),
            module_cache: IndexMap::new(),
            steps: 0,
            call_depth: 0,
        };
        crate::stdlib::install(&mut interpreter);
        interpreter
    }

    /// Grammar used by [`Interpreter::eval_source`].
    pub fn with_registry(mut self, registry: TokenRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_lexer_options(mut self, options: LexerOptions) -> Self {
        self.lexer_options = options;
        self
    }

    pub fn with_parser_options(mut self, options: ParserOptions) -> Self {
        self.parser_options = options;
        self
    }

    pub fn options(&self) -> &InterpreterOptions {
        &self.options
    }

    pub fn registry(&self) -> &TokenRegistry {
        &self.registry
    }

    pub fn globals(&self) -> EnvironmentRef {
        Rc::clone(&self.globals)
    }

    /// Steps consumed by the most recent `eval`.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Registers a built-in, replacing any existing one with the same name.
    pub fn register_builtin(&mut self, name: impl Into<String>, arity: usize, callback: BuiltinFn) {
        let name = name.into();
        let builtin = Value::new(ValueKind::Builtin(Builtin {
            name: name.clone(),
            arity,
            callback,
        }));
        self.builtins.insert(name, builtin);
    }

    pub fn builtin(&self, name: &str) -> Option<Value> {
        self.builtins.get(name).cloned()
    }

    pub fn register_module(&mut self, name: impl Into<String>, exports: IndexMap<String, Value>) {
        let name = name.into();
        self.module_cache.shift_remove(&name);
        self.modules.insert(name, exports);
    }

    /// Resolvers are consulted in registration order after the module table.
    pub fn add_resolver<F>(&mut self, resolver: F)
    where
        F: Fn(&str) -> Option<IndexMap<String, Value>> + 'static,
    {
        self.resolvers.push(Box::new(resolver));
    }

    /// Lexes and parses `source` with this interpreter's grammar. The first
    /// syntax error is returned as the failure.
    pub fn parse_source(&self, source: &str) -> Result<Program> {
        let lexer = Lexer::with_options(source, &self.registry, self.lexer_options.clone());
        let output = parser::parse(lexer, self.parser_options.clone())?;
        match output.errors.into_iter().next() {
            Some(first) => Err(NyxError::from(first)),
            None => Ok(output.program),
        }
    }

    pub fn eval_source(&mut self, source: &str) -> Result<Value> {
        let program = self.parse_source(source)?;
        self.eval(&program, None)
    }

    /// Evaluates `program` in `env`, or in the global scope when `None`.
    ///
    /// The value is that of the last statement executed; a top-level
    /// `return` ends the program early with its value.
    pub fn eval(&mut self, program: &Program, env: Option<EnvironmentRef>) -> Result<Value> {
        let env = env.unwrap_or_else(|| Rc::clone(&self.globals));
        self.steps = 0;
        self.in_scope(env, |this| {
            let mut last = Value::null();
            for stmt in &program.statements {
                match this.execute_statement(stmt)? {
                    ControlFlow::Normal(value) => last = value,
                    ControlFlow::Return(value) => return Ok(value),
                    ControlFlow::Break => return Err(loop_control_error("break", stmt.span)),
                    ControlFlow::Continue => {
                        return Err(loop_control_error("continue", stmt.span));
                    }
                }
            }
            Ok(last)
        })
    }

    fn tick(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.options.max_steps {
            warn!(limit = self.options.max_steps, "interpreter step limit exceeded");
            return Err(NyxError::StepLimit {
                limit: self.options.max_steps,
            });
        }
        Ok(())
    }

    /// Runs `f` with `env` as the current scope and restores the previous
    /// scope afterwards, on success and on failure alike.
    fn in_scope<T>(
        &mut self,
        env: EnvironmentRef,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let prev = std::mem::replace(&mut self.env, env);
        let result = f(self);
        self.env = prev;
        result
    }

    fn execute_statement(&mut self, stmt: &Stmt) -> Result<ControlFlow> {
        self.tick()?;
        match &stmt.kind {
            StmtKind::Let { name, value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::null(),
                };
                self.env.borrow_mut().define(name.clone(), value);
                Ok(ControlFlow::Normal(Value::null()))
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::null(),
                };
                Ok(ControlFlow::Return(value))
            }
            StmtKind::Expr(Expr {
                kind:
                    ExprKind::If {
                        condition,
                        consequence,
                        alternative,
                    },
                ..
            }) => self.execute_if(condition, consequence, alternative.as_ref()),
            StmtKind::Expr(expr) => Ok(ControlFlow::Normal(self.evaluate(expr)?)),
            StmtKind::Block(body) => self.execute_block(body),
            StmtKind::While { condition, body } => {
                loop {
                    if !self.evaluate(condition)?.is_truthy() {
                        break;
                    }
                    match self.execute_block(body)? {
                        ControlFlow::Normal(_) | ControlFlow::Continue => {}
                        ControlFlow::Break => break,
                        ControlFlow::Return(value) => return Ok(ControlFlow::Return(value)),
                    }
                }
                Ok(ControlFlow::Normal(Value::null()))
            }
            StmtKind::For {
                init,
                condition,
                update,
                body,
            } => {
                let scope = Environment::with_parent(Rc::clone(&self.env));
                self.in_scope(scope, |this| {
                    if let Some(init) = init {
                        this.execute_statement(init)?;
                    }
                    loop {
                        if let Some(condition) = condition {
                            if !this.evaluate(condition)?.is_truthy() {
                                break;
                            }
                        }
                        match this.execute_block(body)? {
                            ControlFlow::Normal(_) | ControlFlow::Continue => {}
                            ControlFlow::Break => break,
                            ControlFlow::Return(value) => return Ok(ControlFlow::Return(value)),
                        }
                        if let Some(update) = update {
                            this.evaluate(update)?;
                        }
                    }
                    Ok(ControlFlow::Normal(Value::null()))
                })
            }
            StmtKind::ForIn {
                key,
                binding,
                iterable,
                body,
            } => {
                let iterable_value = self.evaluate(iterable)?;
                for (index, item) in self.iterate(&iterable_value, iterable.span)? {
                    let scope = Environment::with_parent(Rc::clone(&self.env));
                    {
                        let mut scope = scope.borrow_mut();
                        match key {
                            Some(key) => {
                                scope.define(key.clone(), index);
                                scope.define(binding.clone(), item);
                            }
                            None => scope.define(binding.clone(), item),
                        }
                    }
                    match self.run_block_in(scope, body)? {
                        ControlFlow::Normal(_) | ControlFlow::Continue => {}
                        ControlFlow::Break => break,
                        ControlFlow::Return(value) => return Ok(ControlFlow::Return(value)),
                    }
                }
                Ok(ControlFlow::Normal(Value::null()))
            }
            StmtKind::Break => Ok(ControlFlow::Break),
            StmtKind::Continue => Ok(ControlFlow::Continue),
            StmtKind::Class {
                name,
                superclass,
                body,
            } => {
                let class = self.build_class(name, superclass.as_deref(), body, stmt.span)?;
                self.env.borrow_mut().define(name.clone(), class);
                Ok(ControlFlow::Normal(Value::null()))
            }
            StmtKind::Import { path, alias } => {
                let module = self.resolve_module(path);
                let name = alias.clone().unwrap_or_else(|| binding_name(path));
                self.env.borrow_mut().define(name, module.unwrap_or_else(Value::null));
                Ok(ControlFlow::Normal(Value::null()))
            }
            StmtKind::Use { path } => {
                let module = self.resolve_module(path);
                self.env
                    .borrow_mut()
                    .define(binding_name(path), module.unwrap_or_else(Value::null));
                Ok(ControlFlow::Normal(Value::null()))
            }
            StmtKind::FromImport { path, names } => {
                self.import_names(path, names, stmt.span)?;
                Ok(ControlFlow::Normal(Value::null()))
            }
            StmtKind::Try {
                body,
                except,
                finally,
            } => self.execute_try(body, except.as_ref(), finally.as_ref()),
            StmtKind::Raise(expr) => {
                let message = match expr {
                    Some(expr) => self.evaluate(expr)?.to_string(),
                    None => "exception raised".to_string(),
                };
                Err(runtime_error(message, stmt.span))
            }
            StmtKind::Assert { condition, message } => {
                if self.evaluate(condition)?.is_truthy() {
                    return Ok(ControlFlow::Normal(Value::null()));
                }
                let message = match message {
                    Some(expr) => format!("assertion failed: {}", self.evaluate(expr)?),
                    None => "assertion failed".to_string(),
                };
                Err(runtime_error(message, stmt.span))
            }
            StmtKind::With {
                context,
                binding,
                body,
            } => {
                let context_value = self.evaluate(context)?;
                let scope = Environment::with_parent(Rc::clone(&self.env));
                if let Some(binding) = binding {
                    scope.borrow_mut().define(binding.clone(), context_value);
                }
                self.run_block_in(scope, body)
            }
            StmtKind::Async(inner) => self.execute_statement(inner),
            StmtKind::Pass => Ok(ControlFlow::Normal(Value::null())),
            StmtKind::Extension(node) => {
                Ok(ControlFlow::Normal(self.unknown_node(&node.name, stmt.span)?))
            }
        }
    }

    fn execute_block(&mut self, statements: &[Stmt]) -> Result<ControlFlow> {
        let scope = Environment::with_parent(Rc::clone(&self.env));
        self.run_block_in(scope, statements)
    }

    fn run_block_in(&mut self, scope: EnvironmentRef, statements: &[Stmt]) -> Result<ControlFlow> {
        self.in_scope(scope, |this| this.run_statements(statements))
    }

    fn run_statements(&mut self, statements: &[Stmt]) -> Result<ControlFlow> {
        let mut last = Value::null();
        for stmt in statements {
            match self.execute_statement(stmt)? {
                ControlFlow::Normal(value) => last = value,
                other => return Ok(other),
            }
        }
        Ok(ControlFlow::Normal(last))
    }

    fn execute_if(
        &mut self,
        condition: &Expr,
        consequence: &Block,
        alternative: Option<&Block>,
    ) -> Result<ControlFlow> {
        if self.evaluate(condition)?.is_truthy() {
            self.execute_block(consequence)
        } else if let Some(alternative) = alternative {
            self.execute_block(alternative)
        } else {
            Ok(ControlFlow::Normal(Value::null()))
        }
    }

    fn execute_try(
        &mut self,
        body: &Block,
        except: Option<&ExceptClause>,
        finally: Option<&Block>,
    ) -> Result<ControlFlow> {
        let outcome = match (self.execute_block(body), except) {
            (Err(NyxError::Diagnostic(diagnostic)), Some(clause)) => {
                debug!(message = %diagnostic.message, "exception caught");
                let scope = Environment::with_parent(Rc::clone(&self.env));
                if let Some(binding) = &clause.binding {
                    scope
                        .borrow_mut()
                        .define(binding.clone(), Value::string(diagnostic.message));
                }
                self.run_block_in(scope, &clause.body)
            }
            (outcome, _) => outcome,
        };
        if let Some(finally) = finally {
            match self.execute_block(finally)? {
                ControlFlow::Normal(_) => {}
                flow => return Ok(flow),
            }
        }
        outcome
    }

    fn build_class(
        &mut self,
        name: &str,
        superclass: Option<&str>,
        body: &Block,
        span: SourceSpan,
    ) -> Result<Value> {
        let superclass = match superclass {
            Some(parent) => match self.lookup(parent, span)?.kind() {
                ValueKind::Class(class) => Some(Rc::clone(class)),
                _ => {
                    return Err(runtime_error(
                        format!("superclass `{parent}` is not a class"),
                        span,
                    ));
                }
            },
            None => None,
        };

        let mut methods = IndexMap::new();
        let mut fields = IndexMap::new();
        for stmt in body {
            match &stmt.kind {
                StmtKind::Expr(Expr {
                    kind:
                        ExprKind::Function {
                            name: Some(method),
                            params,
                            body,
                        },
                    ..
                }) => {
                    let function = UserFunction {
                        name: Some(method.clone()),
                        params: params.clone(),
                        body: Rc::new(body.clone()),
                        env: Rc::clone(&self.env),
                    };
                    methods.insert(method.clone(), function);
                }
                StmtKind::Let {
                    name: field, value, ..
                } => {
                    let value = match value {
                        Some(expr) => self.evaluate(expr)?,
                        None => Value::null(),
                    };
                    fields.insert(field.clone(), value);
                }
                _ => {}
            }
        }

        Ok(Value::new(ValueKind::Class(Rc::new(NyxClass {
            name: name.to_string(),
            superclass,
            methods,
            fields,
        }))))
    }

    fn resolve_module(&mut self, path: &str) -> Option<Value> {
        if let Some(module) = self.module_cache.get(path) {
            return Some(module.clone());
        }
        let exports = self
            .modules
            .get(path)
            .cloned()
            .or_else(|| self.resolvers.iter().find_map(|resolve| resolve(path)));
        match exports {
            Some(exports) => {
                let module = Value::module(path, exports);
                self.module_cache.insert(path.to_string(), module.clone());
                Some(module)
            }
            None => {
                debug!(module = path, "module not found; binding null");
                None
            }
        }
    }

    fn import_names(&mut self, path: &str, names: &ImportNames, span: SourceSpan) -> Result<()> {
        let Some(module) = self.resolve_module(path) else {
            return Ok(());
        };
        let ValueKind::Module(module) = module.kind() else {
            return Ok(());
        };
        let mut scope = self.env.borrow_mut();
        match names {
            ImportNames::All => {
                for (name, value) in &module.exports {
                    scope.define(name.clone(), value.clone());
                }
            }
            ImportNames::Names(names) => {
                for name in names {
                    let value = module.exports.get(name).cloned().ok_or_else(|| {
                        runtime_error(format!("cannot import `{name}` from `{path}`"), span)
                    })?;
                    scope.define(name.clone(), value);
                }
            }
        }
        Ok(())
    }

    fn unknown_node(&self, name: &str, span: SourceSpan) -> Result<Value> {
        if self.options.strict_unknown_nodes {
            return Err(runtime_error(format!("unsupported AST node: {name}"), span));
        }
        debug!(node = name, "no evaluation rule; yielding null");
        Ok(Value::null())
    }

    /// Scope chain first, so bindings shadow built-ins.
    fn lookup(&self, name: &str, span: SourceSpan) -> Result<Value> {
        Environment::get(&self.env, name, span)
            .or_else(|err| self.builtins.get(name).cloned().ok_or(err))
    }

    fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        self.tick()?;
        match &expr.kind {
            ExprKind::Identifier(name) => self.lookup(name, expr.span),
            ExprKind::Literal(literal) => Ok(literal_value(literal)),
            ExprKind::Prefix { op, operand } => {
                let value = self.evaluate(operand)?;
                prefix(*op, value, expr.span)
            }
            ExprKind::Infix { op, left, right } => {
                let left_value = self.evaluate(left)?;
                match op {
                    InfixOp::And if !left_value.is_truthy() => Ok(Value::bool(false)),
                    InfixOp::Or if left_value.is_truthy() => Ok(Value::bool(true)),
                    InfixOp::NullCoalesce if !left_value.is_null() => Ok(left_value),
                    _ => {
                        let right_value = self.evaluate(right)?;
                        infix(*op, left_value, right_value, expr.span)
                    }
                }
            }
            ExprKind::Assign { op, target, value } => self.assign(*op, target, value, expr.span),
            ExprKind::Member { object, property } => {
                if matches!(object.kind, ExprKind::Super) {
                    return self.super_member(property, expr.span);
                }
                let object_value = self.evaluate(object)?;
                member(&object_value, property, expr.span)
            }
            ExprKind::Call { callee, args } => {
                let callee_value = self.evaluate(callee)?;
                let args = self.evaluate_all(args)?;
                self.call_value(&callee_value, args, expr.span)
            }
            ExprKind::Index { target, index } => {
                let target_value = self.evaluate(target)?;
                let index_value = self.evaluate(index)?;
                index_value_of(&target_value, &index_value, expr.span)
            }
            ExprKind::Array(elements) => Ok(Value::array(self.evaluate_all(elements)?)),
            ExprKind::Hash(entries) => {
                let mut map = IndexMap::new();
                for (key_expr, value_expr) in entries {
                    let key = self
                        .evaluate(key_expr)?
                        .hash_key()
                        .map_err(|err| spanned(err, key_expr.span))?;
                    let value = self.evaluate(value_expr)?;
                    map.insert(key, value);
                }
                Ok(Value::map(map))
            }
            ExprKind::If {
                condition,
                consequence,
                alternative,
            } => match self.execute_if(condition, consequence, alternative.as_ref())? {
                ControlFlow::Normal(value) => Ok(value),
                _ => Err(runtime_error(
                    "control flow cannot leave an `if` used as a value",
                    expr.span,
                )),
            },
            ExprKind::Function { name, params, body } => {
                let function = Value::new(ValueKind::Function(UserFunction {
                    name: name.clone(),
                    params: params.clone(),
                    body: Rc::new(body.clone()),
                    env: Rc::clone(&self.env),
                }));
                if let Some(name) = name {
                    self.env.borrow_mut().define(name.clone(), function.clone());
                }
                Ok(function)
            }
            ExprKind::SelfRef => Environment::lookup(&self.env, "self")
                .ok_or_else(|| runtime_error("`self` used outside of a method", expr.span)),
            ExprKind::Super => Environment::lookup(&self.env, "super")
                .ok_or_else(|| runtime_error("`super` used outside of a subclass method", expr.span)),
            ExprKind::New { class, args } => {
                let class_value = self.evaluate(class)?;
                let args = self.evaluate_all(args)?;
                match class_value.kind() {
                    ValueKind::Class(class) => self.instantiate(class, args, expr.span),
                    _ => Err(runtime_error(
                        format!("attempt to instantiate non-class {}", class_value.type_name()),
                        expr.span,
                    )),
                }
            }
            ExprKind::Yield(value) => match value {
                Some(value) => self.evaluate(value),
                None => Ok(Value::null()),
            },
            ExprKind::Await(value) => self.evaluate(value),
            ExprKind::FormatString(format) => self.format(format),
            ExprKind::Extension(node) => self.unknown_node(&node.name, expr.span),
        }
    }

    fn evaluate_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>> {
        exprs.iter().map(|expr| self.evaluate(expr)).collect()
    }

    fn format(&mut self, format: &FormatString) -> Result<Value> {
        let mut out = String::new();
        for (slot, piece) in format.pieces.iter().enumerate() {
            out.push_str(piece);
            for (_, expr) in format.parts.iter().filter(|(at, _)| *at == slot) {
                out.push_str(&self.evaluate(expr)?.to_string());
            }
        }
        Ok(Value::string(out))
    }

    fn assign(&mut self, op: AssignOp, target: &Expr, value: &Expr, span: SourceSpan) -> Result<Value> {
        let value = match op {
            AssignOp::Assign | AssignOp::Declare => self.evaluate(value)?,
            AssignOp::Compound(op) => {
                let current = self.evaluate(target)?;
                let rhs = self.evaluate(value)?;
                infix(op, current, rhs, span)?
            }
        };
        match (&target.kind, op) {
            (ExprKind::Identifier(name), AssignOp::Declare) => {
                self.env.borrow_mut().define(name.clone(), value.clone());
            }
            (ExprKind::Identifier(name), _) => Environment::set(&self.env, name, value.clone()),
            (ExprKind::Member { object, property }, _) => {
                let object_value = self.evaluate(object)?;
                assign_member(&object_value, property, value.clone(), target.span)?;
            }
            (ExprKind::Index { target: owner, index }, _) => {
                let owner_value = self.evaluate(owner)?;
                let index_value = self.evaluate(index)?;
                assign_index(&owner_value, &index_value, value.clone(), target.span)?;
            }
            _ => return Err(runtime_error("invalid assignment target", target.span)),
        }
        Ok(value)
    }

    /// `super.name` inside a method: looked up from the parent class, bound
    /// to the current receiver.
    fn super_member(&self, property: &str, span: SourceSpan) -> Result<Value> {
        let parent = Environment::lookup(&self.env, "super")
            .ok_or_else(|| runtime_error("`super` used outside of a subclass method", span))?;
        let receiver = Environment::lookup(&self.env, "self")
            .ok_or_else(|| runtime_error("`self` used outside of a method", span))?;
        let ValueKind::Class(parent) = parent.kind() else {
            return member(&parent, property, span);
        };
        let (class, function) = parent.find_method(property).ok_or_else(|| {
            runtime_error(
                format!("undefined method `{property}` on class {}", parent.name),
                span,
            )
        })?;
        Ok(Value::new(ValueKind::BoundMethod(BoundMethod {
            receiver,
            function,
            class,
        })))
    }

    pub fn call_value(&mut self, callee: &Value, args: Vec<Value>, span: SourceSpan) -> Result<Value> {
        match callee.kind() {
            ValueKind::Builtin(builtin) => builtin.call(&args).map_err(|err| spanned(err, span)),
            ValueKind::Function(function) => self.call_function(function, args, None, span),
            ValueKind::BoundMethod(method) => self.call_function(
                &method.function,
                args,
                Some((&method.receiver, &method.class)),
                span,
            ),
            ValueKind::Class(class) => self.instantiate(class, args, span),
            _ => Err(runtime_error(
                format!("not a function: {}", callee.type_name()),
                span,
            )),
        }
    }

    /// Binds parameters positionally (missing ones are null) in a child of
    /// the closure's scope. Methods receive the instance as `self`, either
    /// through an explicit first parameter of that name or implicitly.
    fn call_function(
        &mut self,
        function: &UserFunction,
        mut args: Vec<Value>,
        method: Option<(&Value, &Rc<NyxClass>)>,
        span: SourceSpan,
    ) -> Result<Value> {
        if self.call_depth >= self.options.max_call_depth {
            warn!(limit = self.options.max_call_depth, "call depth limit exceeded");
            return Err(runtime_error("maximum recursion depth exceeded", span));
        }
        let scope = Environment::with_parent(Rc::clone(&function.env));
        {
            let mut scope = scope.borrow_mut();
            if let Some((receiver, class)) = method {
                if function.params.first().map(String::as_str) == Some("self") {
                    args.insert(0, receiver.clone());
                } else {
                    scope.define("self", receiver.clone());
                }
                if let Some(parent) = &class.superclass {
                    scope.define("super", Value::new(ValueKind::Class(Rc::clone(parent))));
                }
            }
            let mut args = args.into_iter();
            for param in &function.params {
                scope.define(param.clone(), args.next().unwrap_or_else(Value::null));
            }
        }

        let body = Rc::clone(&function.body);
        self.call_depth += 1;
        let flow = self.run_block_in(scope, &body);
        self.call_depth -= 1;
        match flow? {
            ControlFlow::Normal(value) | ControlFlow::Return(value) => Ok(value),
            ControlFlow::Break => Err(loop_control_error("break", span)),
            ControlFlow::Continue => Err(loop_control_error("continue", span)),
        }
    }

    fn instantiate(&mut self, class: &Rc<NyxClass>, args: Vec<Value>, span: SourceSpan) -> Result<Value> {
        let instance = Value::new(ValueKind::Instance(Instance {
            class: Rc::clone(class),
            fields: RefCell::new(class.default_fields()),
        }));
        if let Some((owner, init)) = class.find_method("init") {
            self.call_function(&init, args, Some((&instance, &owner)), span)?;
        }
        Ok(instance)
    }

    /// `(key, value)` pairs: index and element for arrays and strings,
    /// key and value for maps.
    fn iterate(&self, value: &Value, span: SourceSpan) -> Result<Vec<(Value, Value)>> {
        match value.kind() {
            ValueKind::Array(values) => Ok(values
                .borrow()
                .iter()
                .enumerate()
                .map(|(idx, item)| (Value::int(idx as i64), item.clone()))
                .collect()),
            ValueKind::String(text) => Ok(text
                .chars()
                .enumerate()
                .map(|(idx, ch)| (Value::int(idx as i64), Value::string(ch.to_string())))
                .collect()),
            ValueKind::Map(map) => Ok(map
                .borrow()
                .iter()
                .map(|(key, value)| (key.to_value(), value.clone()))
                .collect()),
            _ => Err(runtime_error(
                format!("for-in iterable is not iterable: {}", value.type_name()),
                span,
            )),
        }
    }
}

/// Name a module is bound under: the last path segment.
fn binding_name(path: &str) -> String {
    path.rsplit(['/', '.', ':'])
        .find(|segment| !segment.is_empty())
        .unwrap_or(path)
        .to_string()
}

fn runtime_error(message: impl Into<String>, span: SourceSpan) -> NyxError {
    NyxError::from(Diagnostic::runtime(message).with_span(span))
}

fn loop_control_error(keyword: &str, span: SourceSpan) -> NyxError {
    runtime_error(format!("`{keyword}` outside of a loop"), span)
}

/// Attaches `span` to a runtime diagnostic that has none yet.
fn spanned(err: NyxError, span: SourceSpan) -> NyxError {
    match err {
        NyxError::Diagnostic(diagnostic) if diagnostic.span.is_none() => {
            NyxError::from(diagnostic.with_span(span))
        }
        other => other,
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Integer(n) | Literal::Binary(n) | Literal::Octal(n) | Literal::Hex(n) => {
            Value::int(*n)
        }
        Literal::Float(n) => Value::float(*n),
        Literal::String { value, .. } => Value::string(value.clone()),
        Literal::Boolean(b) => Value::bool(*b),
        Literal::Null => Value::null(),
    }
}

fn prefix(op: PrefixOp, value: Value, span: SourceSpan) -> Result<Value> {
    match (op, value.kind()) {
        (PrefixOp::Not, _) => Ok(Value::bool(!value.is_truthy())),
        (PrefixOp::Negate, ValueKind::Int(n)) => n
            .checked_neg()
            .map(Value::int)
            .ok_or_else(|| runtime_error("integer overflow", span)),
        (PrefixOp::Negate, ValueKind::Float(n)) => Ok(Value::float(-n)),
        (PrefixOp::Plus, ValueKind::Int(_) | ValueKind::Float(_)) => Ok(value),
        (PrefixOp::BitNot, ValueKind::Int(n)) => Ok(Value::int(!n)),
        _ => {
            let symbol = match op {
                PrefixOp::Negate => "-",
                PrefixOp::Plus => "+",
                PrefixOp::Not => "!",
                PrefixOp::BitNot => "~",
            };
            Err(runtime_error(
                format!("unknown operator: {symbol}{}", value.type_name()),
                span,
            ))
        }
    }
}

fn unknown_operator(op: InfixOp, left: &Value, right: &Value, span: SourceSpan) -> NyxError {
    runtime_error(
        format!(
            "unknown operator: {} {} {}",
            left.type_name(),
            op.symbol(),
            right.type_name()
        ),
        span,
    )
}

/// Binary operators on already evaluated operands. Booleans are never
/// treated as numbers.
fn infix(op: InfixOp, left: Value, right: Value, span: SourceSpan) -> Result<Value> {
    match op {
        InfixOp::Equal => return Ok(Value::bool(left.equals(&right))),
        InfixOp::NotEqual => return Ok(Value::bool(!left.equals(&right))),
        InfixOp::And => return Ok(Value::bool(left.is_truthy() && right.is_truthy())),
        InfixOp::Or => return Ok(Value::bool(left.is_truthy() || right.is_truthy())),
        InfixOp::NullCoalesce => return Ok(if left.is_null() { right } else { left }),
        _ => {}
    }

    match (left.kind(), right.kind()) {
        (ValueKind::String(_), _) | (_, ValueKind::String(_)) if op == InfixOp::Add => {
            Ok(Value::string(format!("{left}{right}")))
        }
        (ValueKind::String(a), ValueKind::String(b)) => compare(op, a.cmp(b), &left, &right, span),
        (ValueKind::Array(a), ValueKind::Array(b)) if op == InfixOp::Add => {
            let mut joined = a.borrow().clone();
            joined.extend(b.borrow().iter().cloned());
            Ok(Value::array(joined))
        }
        (ValueKind::Int(a), ValueKind::Int(b)) => int_infix(op, *a, *b, &left, &right, span),
        (ValueKind::Int(_) | ValueKind::Float(_), ValueKind::Int(_) | ValueKind::Float(_)) => {
            let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
                return Err(unknown_operator(op, &left, &right, span));
            };
            float_infix(op, a, b, &left, &right, span)
        }
        _ => Err(unknown_operator(op, &left, &right, span)),
    }
}

fn compare(
    op: InfixOp,
    ordering: std::cmp::Ordering,
    left: &Value,
    right: &Value,
    span: SourceSpan,
) -> Result<Value> {
    let result = match op {
        InfixOp::Less => ordering.is_lt(),
        InfixOp::Greater => ordering.is_gt(),
        InfixOp::LessEqual => ordering.is_le(),
        InfixOp::GreaterEqual => ordering.is_ge(),
        _ => return Err(unknown_operator(op, left, right, span)),
    };
    Ok(Value::bool(result))
}

fn int_infix(op: InfixOp, a: i64, b: i64, left: &Value, right: &Value, span: SourceSpan) -> Result<Value> {
    let overflow = || runtime_error("integer overflow", span);
    let division_by_zero = || runtime_error("division by zero", span);
    let value = match op {
        InfixOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        InfixOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        InfixOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        InfixOp::Div => {
            if b == 0 {
                return Err(division_by_zero());
            }
            if a % b != 0 {
                return Ok(Value::float(a as f64 / b as f64));
            }
            a.checked_div(b).ok_or_else(overflow)?
        }
        InfixOp::FloorDiv => {
            if b == 0 {
                return Err(division_by_zero());
            }
            let quotient = a.checked_div(b).ok_or_else(overflow)?;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                quotient - 1
            } else {
                quotient
            }
        }
        InfixOp::Mod => {
            if b == 0 {
                return Err(division_by_zero());
            }
            let rem = a.checked_rem(b).ok_or_else(overflow)?;
            if rem != 0 && ((rem < 0) != (b < 0)) {
                rem + b
            } else {
                rem
            }
        }
        InfixOp::Pow => {
            if b < 0 {
                return Ok(Value::float((a as f64).powf(b as f64)));
            }
            let exponent = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exponent).ok_or_else(overflow)?
        }
        InfixOp::BitAnd => a & b,
        InfixOp::BitOr => a | b,
        InfixOp::BitXor => a ^ b,
        InfixOp::ShiftLeft | InfixOp::ShiftRight => {
            let shift = u32::try_from(b).map_err(|_| runtime_error("negative shift count", span))?;
            let shifted = if op == InfixOp::ShiftLeft {
                a.checked_shl(shift)
            } else {
                a.checked_shr(shift)
            };
            shifted.ok_or_else(overflow)?
        }
        InfixOp::Less | InfixOp::Greater | InfixOp::LessEqual | InfixOp::GreaterEqual => {
            return compare(op, a.cmp(&b), left, right, span);
        }
        _ => return Err(unknown_operator(op, left, right, span)),
    };
    Ok(Value::int(value))
}

fn float_infix(op: InfixOp, a: f64, b: f64, left: &Value, right: &Value, span: SourceSpan) -> Result<Value> {
    let value = match op {
        InfixOp::Add => a + b,
        InfixOp::Sub => a - b,
        InfixOp::Mul => a * b,
        InfixOp::Div | InfixOp::FloorDiv | InfixOp::Mod if b == 0.0 => {
            return Err(runtime_error("division by zero", span));
        }
        InfixOp::Div => a / b,
        InfixOp::FloorDiv => (a / b).floor(),
        InfixOp::Mod => a - b * (a / b).floor(),
        InfixOp::Pow => a.powf(b),
        InfixOp::Less | InfixOp::Greater | InfixOp::LessEqual | InfixOp::GreaterEqual => {
            let Some(ordering) = a.partial_cmp(&b) else {
                return Ok(Value::bool(false));
            };
            return compare(op, ordering, left, right, span);
        }
        _ => return Err(unknown_operator(op, left, right, span)),
    };
    Ok(Value::float(value))
}

fn member(object: &Value, property: &str, span: SourceSpan) -> Result<Value> {
    match object.kind() {
        ValueKind::Instance(instance) => {
            if let Some(value) = instance.fields.borrow().get(property) {
                return Ok(value.clone());
            }
            let (class, function) = instance.class.find_method(property).ok_or_else(|| {
                runtime_error(
                    format!("undefined attribute `{property}` on {object}"),
                    span,
                )
            })?;
            Ok(Value::new(ValueKind::BoundMethod(BoundMethod {
                receiver: object.clone(),
                function,
                class,
            })))
        }
        ValueKind::Map(map) => Ok(map
            .borrow()
            .get(&HashKey::Str(property.to_string()))
            .cloned()
            .unwrap_or_else(Value::null)),
        ValueKind::Module(module) => module.exports.get(property).cloned().ok_or_else(|| {
            runtime_error(
                format!("module `{}` has no export `{property}`", module.name),
                span,
            )
        }),
        ValueKind::Class(class) => class
            .find_method(property)
            .map(|(_, function)| Value::new(ValueKind::Function(function)))
            .ok_or_else(|| {
                runtime_error(
                    format!("undefined method `{property}` on class {}", class.name),
                    span,
                )
            }),
        _ => Err(runtime_error(
            format!("member access on non-object: {}", object.type_name()),
            span,
        )),
    }
}

fn assign_member(object: &Value, property: &str, value: Value, span: SourceSpan) -> Result<()> {
    match object.kind() {
        ValueKind::Instance(instance) => {
            instance.fields.borrow_mut().insert(property.to_string(), value);
            Ok(())
        }
        ValueKind::Map(map) => {
            map.borrow_mut()
                .insert(HashKey::Str(property.to_string()), value);
            Ok(())
        }
        _ => Err(runtime_error(
            format!("member assignment on non-object: {}", object.type_name()),
            span,
        )),
    }
}

/// Resolves a possibly negative index against `len`.
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

fn index_value_of(target: &Value, index: &Value, span: SourceSpan) -> Result<Value> {
    match (target.kind(), index.kind()) {
        (ValueKind::Array(values), ValueKind::Int(idx)) => {
            let values = values.borrow();
            Ok(normalize_index(*idx, values.len())
                .and_then(|idx| values.get(idx).cloned())
                .unwrap_or_else(Value::null))
        }
        (ValueKind::String(text), ValueKind::Int(idx)) => {
            let count = text.chars().count();
            Ok(normalize_index(*idx, count)
                .and_then(|idx| text.chars().nth(idx))
                .map(|ch| Value::string(ch.to_string()))
                .unwrap_or_else(Value::null))
        }
        (ValueKind::Map(map), _) => {
            let key = index.hash_key().map_err(|err| spanned(err, span))?;
            Ok(map.borrow().get(&key).cloned().unwrap_or_else(Value::null))
        }
        (ValueKind::Instance(instance), ValueKind::String(field)) => Ok(instance
            .fields
            .borrow()
            .get(field)
            .cloned()
            .unwrap_or_else(Value::null)),
        (ValueKind::Module(module), ValueKind::String(name)) => {
            Ok(module.exports.get(name).cloned().unwrap_or_else(Value::null))
        }
        _ => Err(runtime_error(
            format!(
                "index operator not supported: {}[{}]",
                target.type_name(),
                index.type_name()
            ),
            span,
        )),
    }
}

fn assign_index(target: &Value, index: &Value, value: Value, span: SourceSpan) -> Result<()> {
    match (target.kind(), index.kind()) {
        (ValueKind::Array(values), ValueKind::Int(idx)) => {
            let mut values = values.borrow_mut();
            let slot = normalize_index(*idx, values.len())
                .ok_or_else(|| runtime_error(format!("index {idx} out of range"), span))?;
            values[slot] = value;
            Ok(())
        }
        (ValueKind::Map(map), _) => {
            let key = index.hash_key().map_err(|err| spanned(err, span))?;
            map.borrow_mut().insert(key, value);
            Ok(())
        }
        (ValueKind::Instance(instance), ValueKind::String(field)) => {
            instance.fields.borrow_mut().insert(field.clone(), value);
            Ok(())
        }
        _ => Err(runtime_error(
            format!(
                "index assignment not supported: {}[{}]",
                target.type_name(),
                index.type_name()
            ),
            span,
        )),
    }
}
