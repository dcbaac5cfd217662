use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;
use tabled::{builder::Builder, Table};

/// Decimal places shown for amounts and rates in tables
const DISPLAY_DP: u32 = 6;

/// Format output as tables: scalar fields first, then one table per nested
/// section (issuance, metrics) and one per list of records (schedule,
/// violations).
pub fn print_table(value: &Value) {
    match value {
        Value::Object(map) => {
            if let Some(result) = map.get("result") {
                print_result_table(result, map);
            } else {
                print_flat_object(map);
            }
        }
        Value::Array(arr) => print_array_table(arr),
        _ => println!("{}", value),
    }
}

fn print_result_table(result: &Value, envelope: &Map<String, Value>) {
    let Value::Object(res_map) = result else {
        print_flat_object(envelope);
        return;
    };

    let mut scalars = Map::new();
    let mut sections: Vec<(&str, &Map<String, Value>)> = Vec::new();
    let mut row_sets: Vec<(&str, &[Value])> = Vec::new();

    for (key, val) in res_map {
        match val {
            Value::Object(inner) => sections.push((key.as_str(), inner)),
            Value::Array(arr) if arr.first().is_some_and(Value::is_object) => {
                row_sets.push((key.as_str(), arr.as_slice()));
            }
            _ => {
                scalars.insert(key.clone(), val.clone());
            }
        }
    }

    if !scalars.is_empty() {
        print_flat_object(&scalars);
    }
    for (title, section) in sections {
        println!("\n{}:", title);
        let mut flat = Map::new();
        flatten_into("", section, &mut flat);
        print_flat_object(&flat);
    }
    for (title, rows) in row_sets {
        println!("\n{}:", title);
        print_array_table(rows);
    }

    if let Some(Value::Array(warnings)) = envelope.get("warnings") {
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in warnings {
                if let Value::String(s) = w {
                    println!("  - {}", s);
                }
            }
        }
    }

    if let Some(Value::String(meth)) = envelope.get("methodology") {
        println!("\nMethodology: {}", meth);
    }
}

/// Nested objects become dotted keys, e.g. `issuer_irr.annual_rate`.
fn flatten_into(prefix: &str, map: &Map<String, Value>, out: &mut Map<String, Value>) {
    for (key, val) in map {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match val {
            Value::Object(inner) => flatten_into(&name, inner, out),
            _ => {
                out.insert(name, val.clone());
            }
        }
    }
}

fn print_flat_object(map: &Map<String, Value>) {
    let mut builder = Builder::default();
    builder.push_record(["Field", "Value"]);
    for (key, val) in map {
        builder.push_record([key.as_str(), &format_value(val)]);
    }
    println!("{}", Table::from(builder));
}

fn print_array_table(arr: &[Value]) {
    if arr.is_empty() {
        println!("(empty)");
        return;
    }

    if let Some(Value::Object(first)) = arr.first() {
        let headers: Vec<String> = first.keys().cloned().collect();
        let mut builder = Builder::default();
        builder.push_record(&headers);

        for item in arr {
            if let Value::Object(map) = item {
                let row: Vec<String> = headers
                    .iter()
                    .map(|h| map.get(h.as_str()).map(format_value).unwrap_or_default())
                    .collect();
                builder.push_record(row);
            }
        }

        println!("{}", Table::from(builder));
    } else {
        for item in arr {
            println!("{}", format_value(item));
        }
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => match Decimal::from_str(s) {
            Ok(d) => d.round_dp(DISPLAY_DP).normalize().to_string(),
            Err(_) => s.clone(),
        },
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "-".to_string(),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(format_value).collect();
            items.join(", ")
        }
        Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decimal_strings_are_rounded() {
        assert_eq!(format_value(&json!("2583.316193609608")), "2583.316194");
        assert_eq!(format_value(&json!("PEN")), "PEN");
    }

    #[test]
    fn test_flatten_nested_irr() {
        let metrics = json!({
            "price": "200000",
            "issuer_irr": { "annual_rate": "0.031", "converged": true }
        });
        let mut out = Map::new();
        if let Value::Object(m) = &metrics {
            flatten_into("", m, &mut out);
        }
        assert!(out.contains_key("issuer_irr.annual_rate"));
        assert!(out.contains_key("price"));
    }
}
