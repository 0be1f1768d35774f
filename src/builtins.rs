//! Filters and tests the engine itself depends on, plus the arrow-function
//! filters. Everything else is registered by the embedding application.

use crate::deferred::Deferred;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::escape::{self, EscapeStrategy};
use crate::value::{Callable, Value};

pub(crate) fn register(env: &Environment) {
    env.add_filter("raw", |value: Value, _args: Vec<Value>| {
        Deferred::resolve(match value {
            Value::Markup(_) => value,
            other => Value::safe(other.to_string()),
        })
    });
    env.add_filter("escape", escape_filter);
    env.add_filter("e", escape_filter);
    env.add_filter("map", map_filter);
    env.add_filter("filter", filter_filter);

    env.add_test("defined", |value: &Value, _args: Vec<Value>| -> Result<bool> {
        Ok(!value.is_undefined())
    });
    env.add_test("null", |value: &Value, _args: Vec<Value>| -> Result<bool> {
        Ok(value.is_none())
    });
    env.add_test("none", |value: &Value, _args: Vec<Value>| -> Result<bool> {
        Ok(value.is_none())
    });
    env.add_test("empty", |value: &Value, _args: Vec<Value>| -> Result<bool> {
        Ok(value.is_empty())
    });
    env.add_test("iterable", |value: &Value, _args: Vec<Value>| -> Result<bool> {
        Ok(matches!(value, Value::Array(_) | Value::Object(_)))
    });
    env.add_test("even", |value: &Value, _args: Vec<Value>| -> Result<bool> {
        Ok(value.to_number() % 2.0 == 0.0)
    });
    env.add_test("odd", |value: &Value, _args: Vec<Value>| -> Result<bool> {
        Ok(value.to_number().abs() % 2.0 == 1.0)
    });
    env.add_test("divisible by", |value: &Value, args: Vec<Value>| -> Result<bool> {
        let divisor = args.first().map_or(f64::NAN, Value::to_number);
        Ok(value.to_number() % divisor == 0.0)
    });
    env.add_test("same as", |value: &Value, args: Vec<Value>| -> Result<bool> {
        let other = args.into_iter().next().unwrap_or_default();
        Ok(value.strict_eq(&other))
    });
}

/// `escape(strategy = 'html')`
fn escape_filter(value: Value, args: Vec<Value>) -> Result<Value> {
    let strategy = match args.first() {
        None => EscapeStrategy::Html,
        Some(name) => {
            let name = name.to_string();
            EscapeStrategy::from_name(&name)
                .ok_or_else(|| Error::runtime(format!("Invalid escaping strategy \"{}\"", name)))?
        }
    };
    Ok(escape::escape_value(&value, strategy))
}

/// `map(arrow)`: the arrow gets each value and its key.
fn map_filter(value: Value, args: Vec<Value>) -> Deferred<Value> {
    let arrow = match arrow_arg(args, "map") {
        Ok(arrow) => arrow,
        Err(err) => return Deferred::reject(err),
    };
    let keyed = matches!(value, Value::Object(_));
    let entries = value.entries().unwrap_or_default();
    let keys: Vec<Value> = entries.iter().map(|(key, _)| key.clone()).collect();
    Deferred::sequence(entries, move |(key, item)| arrow(None, vec![item, key]))
        .map(move |items| collect(keyed, keys, items))
}

/// `filter(arrow)`: keeps the entries the arrow returns something truthy for.
fn filter_filter(value: Value, args: Vec<Value>) -> Deferred<Value> {
    let arrow = match arrow_arg(args, "filter") {
        Ok(arrow) => arrow,
        Err(err) => return Deferred::reject(err),
    };
    let keyed = matches!(value, Value::Object(_));
    let entries = value.entries().unwrap_or_default();
    let kept = entries.clone();
    Deferred::sequence(entries, move |(key, item)| arrow(None, vec![item, key])).map(
        move |verdicts| {
            let (keys, items) = kept
                .into_iter()
                .zip(verdicts)
                .filter(|(_, verdict)| verdict.is_truthy())
                .map(|(entry, _)| entry)
                .unzip();
            collect(keyed, keys, items)
        },
    )
}

fn arrow_arg(args: Vec<Value>, filter: &str) -> Result<Callable> {
    match args.into_iter().next() {
        Some(Value::Function(arrow)) => Ok(arrow),
        _ => Err(Error::runtime(format!(
            "The \"{}\" filter expects an arrow function",
            filter
        ))),
    }
}

fn collect(keyed: bool, keys: Vec<Value>, items: Vec<Value>) -> Value {
    if keyed {
        Value::object(keys.iter().map(Value::to_string).zip(items).collect())
    } else {
        Value::array(items)
    }
}
