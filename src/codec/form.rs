//! Structured form values and their URL encodings.
//!
//! Query strings, form bodies and cookie headers all accept a
//! [`FormValue`]. Nested values flatten to bracketed keys: a list becomes
//! `key[]=a&key[]=b` in a query and `key[0]=a&key[1]=b` in a form body, and
//! a map becomes `key[sub]=value`.

use std::fmt;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Every byte except ASCII alphanumerics and `_ . -` is percent-escaped.
const FORM: &AsciiSet = &NON_ALPHANUMERIC.remove(b'_').remove(b'.').remove(b'-');

/// A structured value for queries, form bodies and cookie headers.
///
/// Maps keep insertion order, which is the order pairs are emitted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    /// A single text value.
    Scalar(String),

    /// An ordered list of values.
    List(Vec<FormValue>),

    /// An ordered list of key/value pairs.
    Map(Vec<(String, FormValue)>),
}

impl FormValue {
    /// An empty map.
    pub fn map() -> Self {
        FormValue::Map(Vec::new())
    }

    /// Append a key/value pair, turning a non-map value into a map.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FormValue>) -> Self {
        let pair = (key.into(), value.into());
        if let FormValue::Map(pairs) = &mut self {
            pairs.push(pair);
            self
        } else {
            FormValue::Map(vec![pair])
        }
    }

    /// Encode as a query string: lists use `key[]`.
    pub fn to_query(&self) -> String {
        encode(self, ListStyle::Brackets)
    }

    /// Encode as an `application/x-www-form-urlencoded` body: lists use
    /// `key[index]`.
    pub fn to_form(&self) -> String {
        encode(self, ListStyle::Indexed)
    }

    /// Encode as a `Cookie` header value: `name=value;` pairs, values
    /// escaped.
    pub fn to_cookie(&self) -> String {
        match self {
            FormValue::Scalar(text) => text.clone(),
            FormValue::List(values) => values
                .iter()
                .map(FormValue::to_cookie)
                .collect::<Vec<_>>()
                .join(" "),
            FormValue::Map(pairs) => pairs
                .iter()
                .map(|(key, value)| format!("{}={};", escape(key), escape(&value.to_cookie())))
                .collect(),
        }
    }
}

impl fmt::Display for FormValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_form())
    }
}

impl From<&str> for FormValue {
    fn from(value: &str) -> Self {
        FormValue::Scalar(value.to_owned())
    }
}

impl From<String> for FormValue {
    fn from(value: String) -> Self {
        FormValue::Scalar(value)
    }
}

macro_rules! scalar_from_display {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for FormValue {
                fn from(value: $ty) -> Self {
                    FormValue::Scalar(value.to_string())
                }
            }
        )*
    };
}

scalar_from_display!(i32, i64, u16, u32, u64, usize, bool);

impl<V: Into<FormValue>> From<Vec<V>> for FormValue {
    fn from(values: Vec<V>) -> Self {
        FormValue::List(values.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<String>, V: Into<FormValue>, const N: usize> From<[(K, V); N]> for FormValue {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<FormValue>> FromIterator<(K, V)> for FormValue {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        FormValue::Map(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// Percent-escape a string for use in a query or form body.
pub fn escape(input: &str) -> String {
    utf8_percent_encode(input, FORM).to_string()
}

#[derive(Debug, Clone, Copy)]
enum ListStyle {
    Brackets,
    Indexed,
}

fn encode(value: &FormValue, style: ListStyle) -> String {
    let mut pairs = Vec::new();
    match value {
        FormValue::Scalar(text) => return text.clone(),
        FormValue::List(values) => {
            for item in values {
                pairs.push(encode(item, style));
            }
        }
        FormValue::Map(entries) => {
            for (key, value) in entries {
                flatten(&escape(key), value, style, &mut pairs);
            }
        }
    }
    pairs.join("&")
}

fn flatten(prefix: &str, value: &FormValue, style: ListStyle, pairs: &mut Vec<String>) {
    match value {
        FormValue::Scalar(text) => pairs.push(format!("{}={}", prefix, escape(text))),
        FormValue::List(values) => {
            for (idx, item) in values.iter().enumerate() {
                let key = match style {
                    ListStyle::Brackets => format!("{prefix}[]"),
                    ListStyle::Indexed => format!("{prefix}[{idx}]"),
                };
                flatten(&key, item, style, pairs);
            }
        }
        FormValue::Map(entries) => {
            for (key, item) in entries {
                flatten(&format!("{}[{}]", prefix, escape(key)), item, style, pairs);
            }
        }
    }
}
