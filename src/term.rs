/// The closed set of comparison operators the filter grammar understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Contains,
    StartsWith,
    EndsWith,
}

impl FilterOperator {
    /// Canonical textual symbol, without negation or case-insensitivity
    /// modifiers.
    pub fn symbol(self) -> &'static str {
        match self {
            FilterOperator::Equals => "==",
            FilterOperator::NotEquals => "!=",
            FilterOperator::GreaterThan => ">",
            FilterOperator::LessThan => "<",
            FilterOperator::GreaterOrEqual => ">=",
            FilterOperator::LessOrEqual => "<=",
            FilterOperator::Contains => "@=",
            FilterOperator::StartsWith => "_=",
            FilterOperator::EndsWith => "$=",
        }
    }
}

/// Operator symbol table. Longer symbols come first so that matching at a
/// given position is greedy: `>=` must win over `>`, `!@=*` over `!@=`.
/// A leading `!` negates the string operators (`!=` is its own operator,
/// not a negated `==`); a trailing `*` makes the comparison
/// case-insensitive.
const SYMBOLS: &[(&str, FilterOperator, bool, bool)] = &[
    ("!@=*", FilterOperator::Contains, true, true),
    ("!_=*", FilterOperator::StartsWith, true, true),
    ("!$=*", FilterOperator::EndsWith, true, true),
    ("!@=", FilterOperator::Contains, true, false),
    ("!_=", FilterOperator::StartsWith, true, false),
    ("!$=", FilterOperator::EndsWith, true, false),
    ("==*", FilterOperator::Equals, false, true),
    ("!=*", FilterOperator::NotEquals, false, true),
    ("@=*", FilterOperator::Contains, false, true),
    ("_=*", FilterOperator::StartsWith, false, true),
    ("$=*", FilterOperator::EndsWith, false, true),
    ("==", FilterOperator::Equals, false, false),
    ("!=", FilterOperator::NotEquals, false, false),
    (">=", FilterOperator::GreaterOrEqual, false, false),
    ("<=", FilterOperator::LessOrEqual, false, false),
    ("@=", FilterOperator::Contains, false, false),
    ("_=", FilterOperator::StartsWith, false, false),
    ("$=", FilterOperator::EndsWith, false, false),
    (">", FilterOperator::GreaterThan, false, false),
    ("<", FilterOperator::LessThan, false, false),
];

/// One atomic filter clause: `name(s) operator value(s)` plus modifiers.
///
/// Alternative names and values are `|`-separated in the grammar
/// (`(Title|Author)==foo`, `Title==C|D`) and both OR together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterTerm {
    pub names: Vec<String>,
    pub operator: FilterOperator,
    /// Empty exactly when the token had no operator or no value text; such
    /// a term is a no-op on a resolved property and a custom-method
    /// invocation otherwise.
    pub values: Vec<String>,
    pub negated: bool,
    pub case_insensitive: bool,
}

impl FilterTerm {
    /// Parse one filter token (`Price>=100`, `(Title|Author)@=*rust`).
    ///
    /// Returns `None` for blank tokens and tokens with no usable name.
    /// A token with no recognized operator symbol is accepted as a
    /// name-only term (operator `Equals`, no values) — downstream this is
    /// a custom-method invocation, a quirk retained from the original
    /// grammar rather than a parse error.
    pub fn parse(token: &str) -> Option<FilterTerm> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }

        let (name_part, op_entry, value_part) = match find_operator(token) {
            Some((pos, entry)) => {
                let (symbol, ..) = *entry;
                (&token[..pos], Some(entry), &token[pos + symbol.len()..])
            }
            None => (token, None, ""),
        };

        let names = split_alternatives(strip_name_parens(name_part.trim()));
        if names.is_empty() {
            return None;
        }

        let values = split_alternatives(value_part.trim());
        let (operator, negated, case_insensitive) = match op_entry {
            Some((_, op, neg, ci)) => (*op, *neg, *ci),
            None => (FilterOperator::Equals, false, false),
        };

        Some(FilterTerm {
            names,
            operator,
            values,
            negated,
            case_insensitive,
        })
    }

    /// The symbol as it appeared in the grammar, modifiers included.
    /// Custom filter methods receive this string.
    pub fn raw_symbol(&self) -> String {
        let mut out = String::new();
        if self.negated {
            out.push('!');
        }
        out.push_str(self.operator.symbol());
        if self.case_insensitive {
            out.push('*');
        }
        out
    }
}

/// One sort key: property name plus direction (`-CreatedDate` descends).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortTerm {
    pub name: String,
    pub descending: bool,
}

impl SortTerm {
    pub fn parse(token: &str) -> Option<SortTerm> {
        let token = token.trim();
        let (name, descending) = match token.strip_prefix('-') {
            Some(rest) => (rest.trim(), true),
            None => (token, false),
        };
        if name.is_empty() {
            return None;
        }
        Some(SortTerm {
            name: name.to_string(),
            descending,
        })
    }
}

/// Find the leftmost operator occurrence, trying symbols longest-first at
/// each position.
fn find_operator(token: &str) -> Option<(usize, &'static (&'static str, FilterOperator, bool, bool))> {
    for (pos, _) in token.char_indices() {
        for entry in SYMBOLS {
            if token[pos..].starts_with(entry.0) {
                return Some((pos, entry));
            }
        }
    }
    None
}

/// `(A|B)` → `A|B`. Only a full wrap is stripped; interior parens stay.
fn strip_name_parens(part: &str) -> &str {
    match part.strip_prefix('(').and_then(|p| p.strip_suffix(')')) {
        Some(inner) => inner,
        None => part,
    }
}

/// Split on unescaped `|`; `\|` is a literal pipe with the escape removed.
/// Blank entries are dropped.
fn split_alternatives(part: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = part.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('|') => current.push('|'),
                Some(other) => {
                    current.push('\\');
                    current.push(other);
                }
                None => current.push('\\'),
            },
            '|' => {
                if !current.trim().is_empty() {
                    out.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}
