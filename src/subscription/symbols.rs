use std::collections::BTreeSet;
use std::fmt;
use serde_json::Value;

// Normalized instrument identifiers: trimmed, upper-cased, de-duplicated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolSet(BTreeSet<String>);

fn normalize(raw: &str) -> Option<String> {
    let symbol = raw.trim().to_uppercase();
    if symbol.is_empty() {
        None
    } else {
        Some(symbol)
    }
}

impl SymbolSet {
    // Accepted payloads, in order:
    //   JSON array of strings             -> each string entry
    //   string holding a JSON array       -> each string entry of the parsed array
    //   any other string                  -> the whole string as one symbol
    //   number                            -> its text as one symbol
    //   anything else                     -> empty
    // Non-string array entries are skipped.
    pub fn from_payload(payload: &Value) -> Self {
        match payload {
            Value::Array(items) => Self::from_entries(items),
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Array(items)) => Self::from_entries(&items),
                _ => std::iter::once(raw.as_str()).collect(),
            },
            Value::Number(number) => std::iter::once(number.to_string()).collect(),
            _ => Self::default(),
        }
    }

    fn from_entries(items: &[Value]) -> Self {
        items.iter().filter_map(Value::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for SymbolSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().filter_map(|raw| normalize(raw.as_ref())).collect())
    }
}

impl fmt::Display for SymbolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.0.iter().map(String::as_str).collect();
        write!(f, "{}", joined.join(", "))
    }
}
