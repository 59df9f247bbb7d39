//! Expression compiler: predicate AST to SQL text plus parameters.

use std::collections::HashMap;

use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::query::expr::{BinaryOp, Expr};
use crate::schema::TableMapping;
use crate::types::{StringComparison, Value};
use crate::value::Param;

/// A compiled SQL fragment and its parameters in text order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledSql {
    pub sql: String,
    pub params: Vec<Param>,
}

/// Compiles a predicate against a table mapping.
///
/// # Errors
///
/// Returns a compile error for unsupported nodes, operators, calls and
/// null comparisons, and [`Error::UnknownColumn`] for unresolved columns.
pub fn compile(expr: &Expr, table: &TableMapping, dialect: &dyn Dialect) -> Result<CompiledSql> {
    let mut compiler = Compiler {
        table,
        dialect,
        names: HashMap::new(),
    };
    let fragment = compiler.compile(expr, None)?;
    Ok(CompiledSql {
        sql: fragment.text,
        params: fragment.params,
    })
}

#[derive(Debug, Default)]
struct Fragment {
    text: String,
    params: Vec<Param>,
    // the literal carried by a constant, possibly folded by NOT/convert
    value: Option<Value>,
    is_param: bool,
}

impl Fragment {
    fn text(text: String, params: Vec<Param>) -> Self {
        Self {
            text,
            params,
            ..Self::default()
        }
    }

    fn is_null_param(&self) -> bool {
        self.is_param && matches!(self.value, Some(Value::Null))
    }
}

struct Compiler<'a> {
    table: &'a TableMapping,
    dialect: &'a dyn Dialect,
    names: HashMap<String, usize>,
}

impl Compiler<'_> {
    fn compile(&mut self, expr: &Expr, hint: Option<&str>) -> Result<Fragment> {
        match expr {
            Expr::Column(name) => {
                let column = self.table.resolve_column(name)?;
                Ok(Fragment::text(
                    self.dialect.quote_identifier(&column.name),
                    Vec::new(),
                ))
            }
            Expr::Constant(value) => self.constant(value.clone(), hint),
            Expr::Collection(values) => self.collection(values, hint),
            Expr::Binary { op, left, right } => self.binary(*op, left, right, hint),
            Expr::Not(operand) => {
                let inner = self.compile(operand, hint)?;
                let value = match inner.value {
                    Some(Value::Bool(b)) => Some(Value::Bool(!b)),
                    other => other,
                };
                Ok(Fragment {
                    text: format!("NOT({})", inner.text),
                    params: inner.params,
                    value,
                    is_param: false,
                })
            }
            Expr::Call {
                method,
                receiver,
                args,
            } => self.call(method, receiver.as_deref(), args, hint),
            Expr::Convert { operand, target } => {
                let mut inner = self.compile(operand, hint)?;
                if let Some(value) = inner.value.take() {
                    let converted = value.convert(*target)?;
                    if inner.is_param {
                        if let Some(param) = inner.params.last_mut() {
                            param.value = converted.to_sql()?;
                        }
                    }
                    inner.value = Some(converted);
                }
                Ok(inner)
            }
            Expr::Conditional { .. } => {
                Err(Error::UnsupportedExpression(expr.kind_name().to_string()))
            }
        }
    }

    fn param_name(&mut self, hint: Option<&str>) -> String {
        let base: String = hint
            .unwrap_or_default()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        let base = if base.is_empty() { "p".to_string() } else { base };
        let seen = self.names.entry(base.clone()).or_insert(0);
        let name = if *seen == 0 {
            base
        } else {
            format!("{base}{seen}")
        };
        *seen += 1;
        name
    }

    fn constant(&mut self, value: Value, hint: Option<&str>) -> Result<Fragment> {
        let name = self.param_name(hint);
        let param = Param {
            name: name.clone(),
            value: value.to_sql()?,
        };
        Ok(Fragment {
            text: self.dialect.placeholder(&name),
            params: vec![param],
            value: Some(value),
            is_param: true,
        })
    }

    fn collection(&mut self, values: &[Value], hint: Option<&str>) -> Result<Fragment> {
        let mut placeholders = Vec::with_capacity(values.len());
        let mut params = Vec::with_capacity(values.len());
        for value in values {
            let name = self.param_name(hint);
            placeholders.push(self.dialect.placeholder(&name));
            params.push(Param {
                name,
                value: value.to_sql()?,
            });
        }
        Ok(Fragment::text(
            format!("({})", placeholders.join(",")),
            params,
        ))
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        hint: Option<&str>,
    ) -> Result<Fragment> {
        if let Some((a, b)) = unwrap_compare_string(left) {
            return self.binary(op, a, b, hint);
        }

        let left = self.compile(left, hint)?;
        let right = self.compile(right, Some(&left.text))?;

        if left.is_null_param() {
            return self.null_comparison(op, right, left);
        }
        if right.is_null_param() {
            return self.null_comparison(op, left, right);
        }

        let token = op
            .sql_token()
            .ok_or_else(|| Error::UnsupportedOperator(op.to_string()))?;
        let text = format!("({} {token} {})", left.text, right.text);
        let mut params = left.params;
        params.extend(right.params);
        Ok(Fragment::text(text, params))
    }

    // `operand` is the non-null side, `null` the bound NULL parameter.
    fn null_comparison(&self, op: BinaryOp, operand: Fragment, null: Fragment) -> Result<Fragment> {
        let keyword = match op {
            BinaryOp::Eq => "is",
            BinaryOp::Ne => "is not",
            op if op.is_ordering() => "<",
            op => return Err(Error::UnsupportedNullComparison(op.to_string())),
        };
        if self.dialect.binds_null_comparisons() {
            let mut params = operand.params;
            params.extend(null.params);
            Ok(Fragment::text(
                format!("({} {keyword} {})", operand.text, null.text),
                params,
            ))
        } else {
            Ok(Fragment::text(
                format!("({} {keyword} null)", operand.text),
                operand.params,
            ))
        }
    }

    fn call(
        &mut self,
        method: &str,
        receiver: Option<&Expr>,
        args: &[Expr],
        hint: Option<&str>,
    ) -> Result<Fragment> {
        let obj = receiver.map(|r| self.compile(r, hint)).transpose()?;
        let arg_hint = obj.as_ref().map_or(hint, |o| Some(o.text.as_str())).map(String::from);

        // comparison modes select the translation and are not bound
        let (args, mode) = match (method, args) {
            ("StartsWith" | "EndsWith", [value, mode_arg]) => {
                (std::slice::from_ref(value), Some(comparison_mode(method, mode_arg)?))
            }
            _ => (args, None),
        };

        let mut compiled = Vec::with_capacity(args.len());
        for arg in args {
            compiled.push(self.compile(arg, arg_hint.as_deref())?);
        }

        let mut params: Vec<Param> = obj.as_ref().map(|o| o.params.clone()).unwrap_or_default();
        for arg in &compiled {
            params.extend(arg.params.iter().cloned());
        }
        let receiver_text = || {
            obj.as_ref()
                .map(|o| o.text.clone())
                .ok_or_else(|| unsupported_call(method, "a receiver is required"))
        };
        let d = self.dialect;

        let text = match (method, compiled.as_slice()) {
            ("Like", [a, b]) => format!("({} like {})", a.text, b.text),
            ("Contains", [collection, item]) => format!("({} in {})", item.text, collection.text),
            ("Contains", [arg]) => {
                let obj_text = receiver_text()?;
                if matches!(receiver, Some(Expr::Collection(_))) {
                    // the item precedes the list in the text
                    params = arg.params.clone();
                    params.extend(obj.as_ref().map(|o| o.params.clone()).unwrap_or_default());
                    format!("({} in {obj_text})", arg.text)
                } else {
                    format!("( {} >0 )", d.position(&obj_text, &arg.text))
                }
            }
            ("StartsWith", [arg]) => {
                let obj_text = receiver_text()?;
                if mode.unwrap_or_default().ignores_case() {
                    format!("({obj_text} like ({}))", d.concat(&arg.text, "'%'"))
                } else {
                    let len = constant_length(method, arg)?;
                    format!(
                        "( {} =  {})",
                        d.substr(&obj_text, "1", &len.to_string()),
                        arg.text
                    )
                }
            }
            ("EndsWith", [arg]) => {
                let obj_text = receiver_text()?;
                if mode.unwrap_or_default().ignores_case() {
                    format!("({obj_text} like ({}))", d.concat("'%'", &arg.text))
                } else {
                    let len = constant_length(method, arg)?;
                    let start = format!("{} - {len}+1", d.length(&obj_text));
                    let receiver_params = obj.as_ref().map_or(&[][..], |o| o.params.as_slice());
                    params = receiver_params
                        .iter()
                        .chain(repeated(d, receiver_params))
                        .chain(&arg.params)
                        .cloned()
                        .collect();
                    format!(
                        "( {} =  {})",
                        d.substr(&obj_text, &start, &len.to_string()),
                        arg.text
                    )
                }
            }
            ("Equals", [arg]) => format!("({} = ({}))", receiver_text()?, arg.text),
            ("ToLower", []) => format!("(lower({}))", receiver_text()?),
            ("ToUpper", []) => format!("(upper({}))", receiver_text()?),
            ("Replace", [from, to]) => {
                format!("(replace({},{},{}))", receiver_text()?, from.text, to.text)
            }
            ("IsNullOrEmpty", [arg]) => {
                params.extend(repeated(d, &arg.params).iter().cloned());
                format!("({0} is null or {0} = '')", arg.text)
            }
            _ => {
                let parts: Vec<&str> = obj
                    .iter()
                    .chain(compiled.iter())
                    .map(|f| f.text.as_str())
                    .collect();
                format!("{}({})", method.to_lowercase(), parts.join(","))
            }
        };
        Ok(Fragment::text(text, params))
    }
}

// Parameters of a fragment whose text is emitted a second time.
fn repeated<'p>(dialect: &dyn Dialect, params: &'p [Param]) -> &'p [Param] {
    if dialect.binds_by_position() {
        params
    } else {
        &[]
    }
}

fn unsupported_call(method: &str, reason: &str) -> Error {
    Error::UnsupportedCall {
        method: method.to_string(),
        reason: reason.to_string(),
    }
}

fn unwrap_compare_string(expr: &Expr) -> Option<(&Expr, &Expr)> {
    match expr {
        Expr::Call {
            method,
            receiver: None,
            args,
        } if method == "CompareString" && args.len() == 3 => Some((&args[0], &args[1])),
        _ => None,
    }
}

fn comparison_mode(method: &str, arg: &Expr) -> Result<StringComparison> {
    match arg {
        Expr::Constant(value) => value
            .as_i64()
            .and_then(StringComparison::from_code)
            .ok_or_else(|| unsupported_call(method, "invalid comparison mode")),
        _ => Err(unsupported_call(
            method,
            "the comparison mode must be a constant",
        )),
    }
}

fn constant_length(method: &str, arg: &Fragment) -> Result<usize> {
    match &arg.value {
        Some(Value::String(text)) => Ok(text.chars().count()),
        _ => Err(unsupported_call(
            method,
            "exact comparison needs a constant string argument",
        )),
    }
}
