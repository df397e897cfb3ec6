use std::sync::Arc;

use serde_json::Value;

use crate::value::{FieldValue, ValueKind};

/// Extracts a field from a record. `None` means an intermediate segment of
/// a navigational path was absent (`post.top_comment` is `None` while
/// resolving `TopComment.Text`); `Some(FieldValue::Null)` means the leaf
/// itself is null. The compiler's null policy depends on the distinction.
pub type Getter<R> = Arc<dyn Fn(&R) -> Option<FieldValue> + Send + Sync>;

/// One whitelisted property: the client-visible name, the internal dot
/// path it maps to, its declared value kind, and what the client may do
/// with it.
#[derive(Clone)]
pub struct PropertyMapping<R> {
    name: String,
    full_path: String,
    kind: ValueKind,
    can_filter: bool,
    can_sort: bool,
    getter: Getter<R>,
}

impl<R> PropertyMapping<R> {
    pub fn new<F>(name: &str, kind: ValueKind, getter: F) -> Self
    where
        F: Fn(&R) -> Option<FieldValue> + Send + Sync + 'static,
    {
        PropertyMapping {
            name: name.to_string(),
            full_path: name.to_string(),
            kind,
            can_filter: false,
            can_sort: false,
            getter: Arc::new(getter),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn can_filter(&self) -> bool {
        self.can_filter
    }

    pub fn can_sort(&self) -> bool {
        self.can_sort
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.full_path = path.to_string();
        self
    }

    pub fn filterable(mut self) -> Self {
        self.can_filter = true;
        self
    }

    pub fn sortable(mut self) -> Self {
        self.can_sort = true;
        self
    }

    pub fn get(&self, record: &R) -> Option<FieldValue> {
        (self.getter)(record)
    }

    pub(crate) fn getter(&self) -> Getter<R> {
        Arc::clone(&self.getter)
    }
}

impl PropertyMapping<Value> {
    /// A mapping over JSON records that navigates `path` (dot-separated)
    /// through nested objects. An absent or null intermediate object makes
    /// the whole access absent; an absent or null leaf is a null value.
    pub fn json(name: &str, path: &str, kind: ValueKind) -> Self {
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        let mapping = PropertyMapping::new(name, kind, move |record: &Value| {
            json_get(record, &segments, kind)
        });
        mapping.with_path(path)
    }
}

fn json_get(record: &Value, segments: &[String], kind: ValueKind) -> Option<FieldValue> {
    let mut current = record;
    for (i, seg) in segments.iter().enumerate() {
        let next = match current {
            Value::Object(map) => map.get(seg.as_str()),
            _ => None,
        };
        let last = i + 1 == segments.len();
        match next {
            Some(v) if last => return Some(json_value(v, kind)),
            None | Some(Value::Null) if last => return Some(FieldValue::Null),
            Some(Value::Null) | None => return None,
            Some(v) => current = v,
        }
    }
    None
}

fn json_value(v: &Value, kind: ValueKind) -> FieldValue {
    match v {
        Value::Null => FieldValue::Null,
        Value::Bool(b) => FieldValue::Bool(*b),
        Value::Number(n) => match kind {
            ValueKind::Float => n.as_f64().map(FieldValue::Float).unwrap_or(FieldValue::Null),
            _ => n
                .as_i64()
                .map(FieldValue::Int)
                .or_else(|| n.as_f64().map(FieldValue::Float))
                .unwrap_or(FieldValue::Null),
        },
        Value::String(s) => match kind {
            ValueKind::DateTime => FieldValue::parse_literal(s, ValueKind::DateTime)
                .unwrap_or(FieldValue::Null),
            _ => FieldValue::Str(s.clone()),
        },
        _ => FieldValue::Null,
    }
}

/// Record types opt in with this trait. `declared_properties` is the
/// inline counterpart of explicit registration: the engine consults it
/// only for names the configured mapper does not know.
pub trait Queryable: Sized {
    fn declared_properties() -> Vec<PropertyMapping<Self>> {
        Vec::new()
    }
}

impl Queryable for Value {}

/// The registration table mapping external names to property mappings.
/// Built once while configuring the engine, read-only afterwards; lookups
/// from concurrent queries share it freely.
pub struct PropertyMapper<R> {
    entries: Vec<PropertyMapping<R>>,
    declared: Vec<PropertyMapping<R>>,
}

impl<R> Default for PropertyMapper<R> {
    fn default() -> Self {
        PropertyMapper {
            entries: Vec::new(),
            declared: Vec::new(),
        }
    }
}

impl<R> PropertyMapper<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a property and continue configuring it fluently:
    ///
    /// ```ignore
    /// mapper.property("Title", ValueKind::Str, |p: &Post| Some(FieldValue::Str(p.title.clone())))
    ///     .can_filter()
    ///     .can_sort();
    /// ```
    ///
    /// Registering the same external name again replaces the earlier
    /// entry (last write wins).
    pub fn property<F>(&mut self, name: &str, kind: ValueKind, getter: F) -> PropertyHandle<'_, R>
    where
        F: Fn(&R) -> Option<FieldValue> + Send + Sync + 'static,
    {
        self.insert(PropertyMapping::new(name, kind, getter))
    }

    /// Register a prebuilt mapping (e.g. [`PropertyMapping::json`]).
    pub fn insert(&mut self, mapping: PropertyMapping<R>) -> PropertyHandle<'_, R> {
        let index = match self.entries.iter().position(|m| m.name == mapping.name) {
            Some(i) => {
                self.entries[i] = mapping;
                i
            }
            None => {
                self.entries.push(mapping);
                self.entries.len() - 1
            }
        };
        PropertyHandle {
            mapper: self,
            index,
        }
    }

    pub(crate) fn set_declared(&mut self, declared: Vec<PropertyMapping<R>>) {
        self.declared = declared;
    }

    /// Look up a name with the required capabilities. Explicit entries
    /// win over the record's inline declarations; `None` sends the caller
    /// to custom-method dispatch.
    pub fn resolve(
        &self,
        name: &str,
        require_filter: bool,
        require_sort: bool,
        case_sensitive: bool,
    ) -> Option<&PropertyMapping<R>> {
        let matches = |m: &&PropertyMapping<R>| {
            let name_ok = if case_sensitive {
                m.name == name
            } else {
                m.name.eq_ignore_ascii_case(name)
            };
            name_ok && (!require_filter || m.can_filter) && (!require_sort || m.can_sort)
        };
        self.entries
            .iter()
            .find(matches)
            .or_else(|| self.declared.iter().find(matches))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.declared.is_empty()
    }
}

/// Fluent capability switches for a just-registered property.
pub struct PropertyHandle<'a, R> {
    mapper: &'a mut PropertyMapper<R>,
    index: usize,
}

impl<'a, R> PropertyHandle<'a, R> {
    pub fn can_filter(self) -> Self {
        self.mapper.entries[self.index].can_filter = true;
        self
    }

    pub fn can_sort(self) -> Self {
        self.mapper.entries[self.index].can_sort = true;
        self
    }

    /// Override the internal dot path the external name maps to.
    pub fn has_path(self, path: &str) -> Self {
        self.mapper.entries[self.index].full_path = path.to_string();
        self
    }
}
