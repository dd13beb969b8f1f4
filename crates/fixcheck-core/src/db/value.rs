use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{json, Map, Value};
use std::iter::Peekable;
use std::str::Chars;

pub type Row = Vec<SqlValue>;
pub type Rows = Vec<Row>;

/// A single cell decoded from either backend.
///
/// Both backends are driven through the simple/text protocol, so every cell
/// arrives as text and is parsed here according to its column type name.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Kept as text to avoid losing precision.
    Decimal(String),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    Json(Value),
    Bytes(Vec<u8>),
}

impl SqlValue {
    /// Parse the text form of a cell given the server's type name
    /// (`INT4`, `NUMERIC`, `TIMESTAMPTZ`, `BIGINT UNSIGNED`, `DATETIME`...).
    pub fn from_text(type_name: &str, text: String) -> SqlValue {
        let ty = type_name.to_ascii_uppercase();
        let ty = ty.as_str();

        if let Some(elem) = ty.strip_suffix("[]") {
            return match parse_pg_array(&text, elem) {
                Some(list) => SqlValue::Json(list),
                None => SqlValue::Text(text),
            };
        }
        match ty {
            "BOOL" | "BOOLEAN" => match text.as_str() {
                "t" | "true" | "1" => SqlValue::Bool(true),
                "f" | "false" | "0" => SqlValue::Bool(false),
                _ => SqlValue::Text(text),
            },
            "INT2" | "INT4" | "INT8" | "OID" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT"
            | "INTEGER" | "BIGINT" | "YEAR" => parse_int(text),
            t if t.ends_with(" UNSIGNED") => parse_int(text),
            "FLOAT4" | "FLOAT8" | "FLOAT" | "DOUBLE" | "REAL" => text
                .parse::<f64>()
                .map(SqlValue::Float)
                .unwrap_or(SqlValue::Text(text)),
            "NUMERIC" | "DECIMAL" | "MONEY" => SqlValue::Decimal(text),
            "DATE" => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                .map(SqlValue::Date)
                .unwrap_or(SqlValue::Text(text)),
            "TIMESTAMP" | "DATETIME" => parse_datetime(&text)
                .map(SqlValue::DateTime)
                .unwrap_or(SqlValue::Text(text)),
            "TIMESTAMPTZ" => DateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f%#z")
                .map(|d| SqlValue::DateTime(d.naive_local()))
                .unwrap_or(SqlValue::Text(text)),
            "TIME" => NaiveTime::parse_from_str(&text, "%H:%M:%S%.f")
                .map(SqlValue::Time)
                .unwrap_or(SqlValue::Text(text)),
            "JSON" | "JSONB" => serde_json::from_str(&text)
                .map(SqlValue::Json)
                .unwrap_or(SqlValue::Text(text)),
            "BYTEA" => match text.strip_prefix("\\x").and_then(decode_hex) {
                Some(bytes) => SqlValue::Bytes(bytes),
                None => SqlValue::Text(text),
            },
            "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => {
                SqlValue::Bytes(text.into_bytes())
            }
            _ => SqlValue::Text(text),
        }
    }

    /// MySQL drivers hand JSON columns over as strings, so they stay text.
    pub fn from_mysql_text(type_name: &str, text: String) -> SqlValue {
        if type_name.eq_ignore_ascii_case("JSON") {
            return SqlValue::Text(text);
        }
        Self::from_text(type_name, text)
    }

    /// Untagged JSON, used for array elements.
    fn plain_json(self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => json!(b),
            SqlValue::Int(i) => json!(i),
            SqlValue::Float(f) => json!(f),
            SqlValue::Decimal(d) => match d.parse::<f64>() {
                Ok(f) => json!(f),
                Err(_) => json!(d),
            },
            SqlValue::Text(s) => json!(s),
            SqlValue::Json(v) => v,
            other => match other.to_wire() {
                Value::Object(map) => map.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null),
                v => v,
            },
        }
    }

    /// Tagged JSON understood by the test-case prelude.
    pub fn to_wire(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => json!(b),
            SqlValue::Int(i) => json!(i),
            SqlValue::Float(f) => json!(f),
            SqlValue::Decimal(d) => json!({ "$decimal": d }),
            SqlValue::Text(s) => json!(s),
            SqlValue::Date(d) => json!({ "$date": d.format("%Y-%m-%d").to_string() }),
            SqlValue::DateTime(d) => {
                json!({ "$datetime": d.format("%Y-%m-%dT%H:%M:%S%.f").to_string() })
            }
            SqlValue::Time(t) => json!({ "$time": t.format("%H:%M:%S%.f").to_string() }),
            SqlValue::Json(v) => json!({ "$json": v }),
            SqlValue::Bytes(b) => json!({ "$bytes": encode_hex(b) }),
        }
    }

    pub fn from_wire(v: &Value) -> SqlValue {
        match v {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => SqlValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Array(_) => SqlValue::Json(v.clone()),
            Value::Object(map) => from_tagged(map).unwrap_or_else(|| SqlValue::Json(v.clone())),
        }
    }

    /// Key used for set comparison of result rows. Numbers compare by value
    /// regardless of how the backend typed them.
    pub fn canonical_key(&self) -> String {
        match self {
            SqlValue::Null => "N".into(),
            SqlValue::Bool(b) => format!("B:{b}"),
            SqlValue::Int(i) => format!("#{i}"),
            SqlValue::Float(f) => canonical_number(*f),
            SqlValue::Decimal(d) => match d.trim().parse::<f64>() {
                Ok(f) => canonical_number(f),
                Err(_) => format!("S:{d}"),
            },
            SqlValue::Text(s) => format!("S:{s}"),
            SqlValue::Date(d) => format!("D:{d}"),
            SqlValue::DateTime(d) => format!("T:{d}"),
            SqlValue::Time(t) => format!("H:{t}"),
            SqlValue::Json(v) => format!("J:{v}"),
            SqlValue::Bytes(b) => format!("X:{}", encode_hex(b)),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) | SqlValue::Decimal(s) => Some(s),
            _ => None,
        }
    }
}

pub fn rows_to_wire(rows: &Rows) -> Value {
    Value::Array(
        rows.iter()
            .map(|r| Value::Array(r.iter().map(SqlValue::to_wire).collect()))
            .collect(),
    )
}

/// Null stays null (statement produced no result set). A non-array value is
/// treated as a single one-column row.
pub fn rows_from_wire(v: &Value) -> Option<Rows> {
    match v {
        Value::Null => None,
        Value::Array(rows) => Some(
            rows.iter()
                .map(|r| match r {
                    Value::Array(cells) => cells.iter().map(SqlValue::from_wire).collect(),
                    other => vec![SqlValue::from_wire(other)],
                })
                .collect(),
        ),
        other => Some(vec![vec![SqlValue::from_wire(other)]]),
    }
}

pub fn row_key(row: &Row) -> String {
    row.iter()
        .map(SqlValue::canonical_key)
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

fn from_tagged(map: &Map<String, Value>) -> Option<SqlValue> {
    if map.len() != 1 {
        return None;
    }
    let (tag, inner) = map.iter().next()?;
    let text = inner.as_str();
    match tag.as_str() {
        "$date" => NaiveDate::parse_from_str(text?, "%Y-%m-%d")
            .ok()
            .map(SqlValue::Date),
        "$datetime" => parse_datetime(text?).map(SqlValue::DateTime),
        "$time" => NaiveTime::parse_from_str(text?, "%H:%M:%S%.f")
            .ok()
            .map(SqlValue::Time),
        "$decimal" => Some(SqlValue::Decimal(text?.to_string())),
        "$bytes" => decode_hex(text?).map(SqlValue::Bytes),
        "$json" => Some(SqlValue::Json(inner.clone())),
        _ => None,
    }
}

/// Parses a PostgreSQL array literal (`{1,2}`, `{{a,b},{c,NULL}}`,
/// `{"x y","q\"d"}`) into a JSON list, decoding elements as `elem_type`.
/// Literals with explicit bounds (`[0:1]={...}`) are not handled.
fn parse_pg_array(text: &str, elem_type: &str) -> Option<Value> {
    let mut chars = text.chars().peekable();
    let list = parse_array_level(&mut chars, elem_type)?;
    chars.next().is_none().then_some(list)
}

fn parse_array_level(it: &mut Peekable<Chars<'_>>, elem_type: &str) -> Option<Value> {
    if it.next()? != '{' {
        return None;
    }
    let mut items = Vec::new();
    if it.peek() == Some(&'}') {
        it.next();
        return Some(Value::Array(items));
    }
    loop {
        match *it.peek()? {
            '{' => items.push(parse_array_level(it, elem_type)?),
            '"' => {
                it.next();
                let mut s = String::new();
                loop {
                    match it.next()? {
                        '\\' => s.push(it.next()?),
                        '"' => break,
                        c => s.push(c),
                    }
                }
                items.push(SqlValue::from_text(elem_type, s).plain_json());
            }
            _ => {
                let mut s = String::new();
                while let Some(&c) = it.peek() {
                    if c == ',' || c == '}' {
                        break;
                    }
                    s.push(c);
                    it.next();
                }
                if s == "NULL" {
                    items.push(Value::Null);
                } else {
                    items.push(SqlValue::from_text(elem_type, s).plain_json());
                }
            }
        }
        match it.next()? {
            ',' => {}
            '}' => return Some(Value::Array(items)),
            _ => return None,
        }
    }
}

fn parse_int(text: String) -> SqlValue {
    text.parse::<i64>()
        .map(SqlValue::Int)
        .unwrap_or(SqlValue::Decimal(text))
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

fn canonical_number(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("#{}", f as i64)
    } else {
        format!("#{f}")
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_cells_parse_by_type_name() {
        assert_eq!(SqlValue::from_text("INT4", "42".into()), SqlValue::Int(42));
        assert_eq!(
            SqlValue::from_text("BIGINT UNSIGNED", "18446744073709551615".into()),
            SqlValue::Decimal("18446744073709551615".into())
        );
        assert_eq!(SqlValue::from_text("bool", "t".into()), SqlValue::Bool(true));
        assert_eq!(
            SqlValue::from_text("DATE", "2024-01-01".into()),
            SqlValue::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
        );
        assert_eq!(
            SqlValue::from_text("BYTEA", "\\x0aff".into()),
            SqlValue::Bytes(vec![0x0a, 0xff])
        );
        assert_eq!(
            SqlValue::from_text("TEXT", "hello".into()),
            SqlValue::Text("hello".into())
        );
    }

    #[test]
    fn postgres_arrays_become_lists() {
        assert_eq!(
            SqlValue::from_text("INT4[]", "{1,2,NULL}".into()),
            SqlValue::Json(json!([1, 2, null]))
        );
        assert_eq!(
            SqlValue::from_text("TEXT[]", "{}".into()),
            SqlValue::Json(json!([]))
        );
        assert_eq!(
            SqlValue::from_text("TEXT[]", r#"{plain,"with space","q\"d",NULL}"#.into()),
            SqlValue::Json(json!(["plain", "with space", "q\"d", null]))
        );
        assert_eq!(
            SqlValue::from_text("INT8[]", "{{1,2},{3,4}}".into()),
            SqlValue::Json(json!([[1, 2], [3, 4]]))
        );
        assert_eq!(
            SqlValue::from_text("DATE[]", "{2024-01-01}".into()),
            SqlValue::Json(json!(["2024-01-01"]))
        );
        assert_eq!(
            SqlValue::from_text("INT4[]", "[0:1]={1,2}".into()),
            SqlValue::Text("[0:1]={1,2}".into())
        );
    }

    #[test]
    fn json_columns_follow_the_driver() {
        assert_eq!(
            SqlValue::from_text("JSONB", r#"{"a": 1}"#.into()),
            SqlValue::Json(json!({"a": 1}))
        );
        assert_eq!(
            SqlValue::from_mysql_text("JSON", r#"{"a": 1}"#.into()),
            SqlValue::Text(r#"{"a": 1}"#.into())
        );
        assert_eq!(SqlValue::from_mysql_text("INT", "7".into()), SqlValue::Int(7));
    }

    #[test]
    fn timestamptz_keeps_local_wall_clock() {
        let v = SqlValue::from_text("TIMESTAMPTZ", "2024-03-05 10:11:12+02".into());
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(10, 11, 12)
            .unwrap();
        assert_eq!(v, SqlValue::DateTime(expected));
    }

    #[test]
    fn wire_tags_survive_a_trip() {
        let d = SqlValue::Date(NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
        assert_eq!(d.to_wire(), json!({"$date": "2023-12-31"}));
        assert_eq!(SqlValue::from_wire(&d.to_wire()), d);

        let plain = json!({"a": 1, "b": 2});
        assert_eq!(SqlValue::from_wire(&plain), SqlValue::Json(plain.clone()));
    }

    #[test]
    fn numbers_compare_by_value() {
        assert_eq!(
            SqlValue::Int(3).canonical_key(),
            SqlValue::Decimal("3.00".into()).canonical_key()
        );
        assert_eq!(
            SqlValue::Float(1.5).canonical_key(),
            SqlValue::Decimal("1.50".into()).canonical_key()
        );
        assert_ne!(
            SqlValue::Int(1).canonical_key(),
            SqlValue::Text("1".into()).canonical_key()
        );
    }

    #[test]
    fn null_wire_is_no_result_set() {
        assert_eq!(rows_from_wire(&Value::Null), None);
        assert_eq!(
            rows_from_wire(&json!([[1, "a"]])),
            Some(vec![vec![SqlValue::Int(1), SqlValue::Text("a".into())]])
        );
    }
}
