use itertools::Itertools;
use tracing::debug;

use crate::errors::{QueryError, Result};
use crate::term::{FilterTerm, SortTerm};

/// An ordered list of terms that must all hold (comma-separated clauses).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterGroup {
    pub terms: Vec<FilterTerm>,
}

/// The parse result: OR semantics across groups, AND within each group.
/// Every group is non-empty; an all-blank input parses to "no filter"
/// (`None` from [`parse_filters`]), never to an empty group list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilter {
    pub groups: Vec<FilterGroup>,
}

/// Parse a filter string into OR-groups of AND-terms.
///
/// Without parentheses, top-level `||` splits the string into independent
/// AND-chains:
///
/// - `A==1,B==2`          → `[[A==1, B==2]]`
/// - `A==1 || B==2`       → `[[A==1], [B==2]]`
///
/// Parenthesized OR groups distribute over the surrounding AND context as
/// a Cartesian product:
///
/// - `(A==1 || B==2),C==3` → `[[A==1, C==3], [B==2, C==3]]`
/// - `(A || B),(C || D)`   → `[[A,C], [A,D], [B,C], [B,D]]`
///
/// Blank input and input whose every segment is blank yield `Ok(None)`.
/// An unmatched `(` is a hard error with its byte position.
pub fn parse_filters(input: &str) -> Result<Option<ParsedFilter>> {
    if input.trim().is_empty() {
        return Ok(None);
    }

    let groups = if !input.contains('(') && !input.contains(')') {
        parse_simple(input)
    } else {
        parse_with_groups(input)?
    };

    debug!(groups = groups.len(), "parsed filter string");
    if groups.is_empty() {
        Ok(None)
    } else {
        Ok(Some(ParsedFilter { groups }))
    }
}

/// Parse a sort string: comma-separated names, leading `-` for descending.
/// Duplicate names (direction-stripped) keep their first occurrence only.
pub fn parse_sorts(input: &str) -> Vec<SortTerm> {
    let mut terms: Vec<SortTerm> = Vec::new();
    for token in split_unescaped_commas(input) {
        if let Some(term) = SortTerm::parse(&token) {
            if terms.iter().all(|t| t.name != term.name) {
                terms.push(term);
            }
        }
    }
    terms
}

/// Fast path for strings with no parentheses: `||` makes groups, commas
/// make terms within each group.
fn parse_simple(input: &str) -> Vec<FilterGroup> {
    let mut groups = Vec::new();
    for chain in split_unescaped_or(input) {
        let terms: Vec<FilterTerm> = split_unescaped_commas(&chain)
            .iter()
            .filter_map(|t| FilterTerm::parse(t))
            .collect();
        if !terms.is_empty() {
            groups.push(FilterGroup { terms });
        }
    }
    groups
}

/// Parenthesized path: collect AND-segments (each an option set), then
/// expand the Cartesian product of the option sets into groups.
fn parse_with_groups(input: &str) -> Result<Vec<FilterGroup>> {
    let segments = parse_and_segments(input)?;
    if segments.is_empty() {
        return Ok(Vec::new());
    }

    let mut groups = Vec::new();
    for combo in segments.iter().map(|s| s.iter()).multi_cartesian_product() {
        let terms: Vec<FilterTerm> = combo
            .into_iter()
            .filter_map(|t| FilterTerm::parse(t))
            .collect();
        if !terms.is_empty() {
            groups.push(FilterGroup { terms });
        }
    }
    Ok(groups)
}

/// Split the filter string into AND segments, each carrying its OR option
/// set. `(A || B),C,(D || E)` → `[[A, B], [C], [D, E]]`.
///
/// A segment that parses to zero non-blank options is dropped rather than
/// annihilating the product.
fn parse_and_segments(input: &str) -> Result<Vec<Vec<String>>> {
    let mut segments: Vec<Vec<String>> = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0;

    while i < input.len() {
        while i < input.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= input.len() {
            break;
        }

        if bytes[i] == b'(' {
            let close = find_matching_close(input, i)
                .ok_or(QueryError::UnmatchedGroup { position: i })?;

            // `(A|B)==3` is a bare term with a parenthesized name list,
            // not an OR group: the group form requires the `)` to end the
            // segment.
            let after = next_top_level_comma(input, close + 1);
            if input[close + 1..after].trim().is_empty() {
                let content = &input[i + 1..close];
                let options: Vec<String> = split_unescaped_or(content)
                    .into_iter()
                    .map(|o| unescape_grammar(o.trim()))
                    .filter(|o| !o.is_empty())
                    .collect();
                if !options.is_empty() {
                    segments.push(options);
                }
                i = close + 1;
                // skip any run of separators after the closing paren
                while i < input.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b',') {
                    i += 1;
                }
                continue;
            }
            // fall through: treat `(...)suffix` as a regular segment
        }

        let end = next_top_level_comma(input, i);
        let raw = input[i..end].trim();
        if !raw.is_empty() {
            // An inline `||` outside parentheses still splits; this is the
            // escape hatch for groups that should have been parenthesized.
            let options: Vec<String> = split_unescaped_or(raw)
                .into_iter()
                .map(|o| unescape_grammar(o.trim()))
                .filter(|o| !o.is_empty())
                .collect();
            if !options.is_empty() {
                segments.push(options);
            }
        }
        i = end;
        if i < input.len() && bytes[i] == b',' {
            i += 1;
        }
    }

    Ok(segments)
}

/// Byte index of the `)` matching the `(` at `open`, honoring nesting and
/// `\(`/`\)` escapes.
fn find_matching_close(input: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut iter = input[open..].char_indices();
    while let Some((off, c)) = iter.next() {
        match c {
            '\\' => {
                iter.next();
            }
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + off);
                }
            }
            _ => {}
        }
    }
    None
}

/// Byte index of the next unescaped comma at parenthesis depth 0 starting
/// from `from`, or the end of the string.
fn next_top_level_comma(input: &str, from: usize) -> usize {
    let mut depth = 0i32;
    let mut iter = input[from..].char_indices();
    while let Some((off, c)) = iter.next() {
        match c {
            '\\' => {
                iter.next();
            }
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => return from + off,
            _ => {}
        }
    }
    input.len()
}

/// Split on unescaped `||` (with or without surrounding spaces). An
/// escaped separator (`\||`) stays in the text with the escape stripped.
/// Blank chunks are dropped; if every chunk is blank the original input is
/// returned as the single chunk.
fn split_unescaped_or(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let bytes = input.as_bytes();
    let mut i = 0;

    while i < input.len() {
        if bytes[i] == b'\\' && input[i + 1..].starts_with("||") {
            current.push_str("||");
            i += 3;
        } else if bytes[i] == b'\\' && input[i + 1..].starts_with(" || ") {
            current.push_str(" || ");
            i += 5;
        } else if input[i..].starts_with(" || ") {
            push_chunk(&mut out, &mut current);
            i += 4;
        } else if input[i..].starts_with("||") {
            push_chunk(&mut out, &mut current);
            i += 2;
        } else {
            let c = input[i..].chars().next().expect("in-bounds char");
            current.push(c);
            i += c.len_utf8();
        }
    }
    push_chunk(&mut out, &mut current);

    if out.is_empty() {
        vec![input.to_string()]
    } else {
        out
    }
}

/// Split on unescaped commas; `\,` is a literal comma with the escape
/// stripped. Blank chunks are dropped.
fn split_unescaped_commas(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(',') => current.push(','),
                Some(other) => {
                    current.push('\\');
                    current.push(other);
                }
                None => current.push('\\'),
            },
            ',' => push_chunk(&mut out, &mut current),
            _ => current.push(c),
        }
    }
    push_chunk(&mut out, &mut current);
    out
}

fn push_chunk(out: &mut Vec<String>, current: &mut String) {
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    current.clear();
}

/// Strip the grammar-level escapes (`\,`, `\(`, `\)`) from a finished
/// option token. Term-level escapes (`\|`, `\null`) pass through intact.
fn unescape_grammar(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(e @ (',' | '(' | ')')) => out.push(e),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::FilterOperator;
    use pretty_assertions::assert_eq;

    fn parsed(input: &str) -> ParsedFilter {
        parse_filters(input)
            .expect("parse should succeed")
            .expect("filter should be non-empty")
    }

    /// Group shapes as `name op value` strings, for compact assertions.
    fn shape(filter: &ParsedFilter) -> Vec<Vec<String>> {
        filter
            .groups
            .iter()
            .map(|g| {
                g.terms
                    .iter()
                    .map(|t| {
                        format!(
                            "{}{}{}",
                            t.names.join("|"),
                            t.raw_symbol(),
                            t.values.join("|")
                        )
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn empty_input_is_no_filter() {
        assert_eq!(parse_filters("").unwrap(), None);
        assert_eq!(parse_filters("   ").unwrap(), None);
        assert_eq!(parse_filters(" , , ").unwrap(), None);
    }

    #[test]
    fn comma_chain_is_one_group() {
        let f = parsed("A==1,B==2,C==3");
        assert_eq!(shape(&f), vec![vec!["A==1", "B==2", "C==3"]]);
    }

    #[test]
    fn top_level_or_splits_chains() {
        let f = parsed("A==1 || B==2");
        assert_eq!(shape(&f), vec![vec!["A==1"], vec!["B==2"]]);

        let f = parsed("A==1,B==2 || C==3");
        assert_eq!(shape(&f), vec![vec!["A==1", "B==2"], vec!["C==3"]]);
    }

    #[test]
    fn or_without_spaces_also_splits() {
        let f = parsed("A==1||B==2");
        assert_eq!(shape(&f), vec![vec!["A==1"], vec!["B==2"]]);
    }

    #[test]
    fn group_distributes_over_following_term() {
        let f = parsed("(A==1 || B==2),C==3");
        assert_eq!(
            shape(&f),
            vec![vec!["A==1", "C==3"], vec!["B==2", "C==3"]]
        );
    }

    #[test]
    fn group_distributes_over_preceding_term() {
        let f = parsed("A==1,(B==2 || C==3)");
        assert_eq!(
            shape(&f),
            vec![vec!["A==1", "B==2"], vec!["A==1", "C==3"]]
        );
    }

    #[test]
    fn two_groups_make_a_product() {
        let f = parsed("(A==1 || B==2),(C==3 || D==4)");
        assert_eq!(
            shape(&f),
            vec![
                vec!["A==1", "C==3"],
                vec!["A==1", "D==4"],
                vec!["B==2", "C==3"],
                vec!["B==2", "D==4"],
            ]
        );
    }

    #[test]
    fn product_with_shared_constraints() {
        let f = parsed("(A==1 || B==2),(C>50 || C<30),D==false");
        assert_eq!(f.groups.len(), 4);
        for group in &f.groups {
            assert_eq!(group.terms.len(), 3);
            assert_eq!(group.terms[2].names, vec!["D"]);
        }
    }

    #[test]
    fn three_way_or_group() {
        let f = parsed("(A==1 || A==2 || A==3)");
        assert_eq!(shape(&f), vec![vec!["A==1"], vec!["A==2"], vec!["A==3"]]);
    }

    #[test]
    fn parenthesized_name_alternatives_stay_one_term() {
        let f = parsed("(Title|LikeCount)==3");
        assert_eq!(shape(&f), vec![vec!["Title|LikeCount==3"]]);

        let f = parsed("CategoryId==1,(CategoryId|LikeCount)==50");
        assert_eq!(
            shape(&f),
            vec![vec!["CategoryId==1", "CategoryId|LikeCount==50"]]
        );
    }

    #[test]
    fn unmatched_open_paren_is_an_error() {
        let err = parse_filters("(A==1 || B==2,C==3").unwrap_err();
        match err {
            QueryError::UnmatchedGroup { position } => assert_eq!(position, 0),
            other => panic!("expected UnmatchedGroup, got {other:?}"),
        }

        let err = parse_filters("A==1,(B==2").unwrap_err();
        match err {
            QueryError::UnmatchedGroup { position } => assert_eq!(position, 5),
            other => panic!("expected UnmatchedGroup, got {other:?}"),
        }
    }

    #[test]
    fn stray_close_paren_is_absorbed() {
        // no opening paren anywhere: the `)` lands in the term text
        let f = parse_filters("A==1)").unwrap().unwrap();
        assert_eq!(f.groups.len(), 1);
    }

    #[test]
    fn escaped_comma_is_literal() {
        let f = parsed(r"Title==a\,b");
        assert_eq!(f.groups[0].terms[0].values, vec!["a,b"]);

        let f = parsed(r"(Title==a\,b || Author==x),Id==1");
        assert_eq!(f.groups.len(), 2);
        assert_eq!(f.groups[0].terms[0].values, vec!["a,b"]);
    }

    #[test]
    fn escaped_parens_are_literal() {
        let f = parsed(r"Text@=\(braces\)");
        assert_eq!(f.groups[0].terms[0].values, vec!["(braces)"]);
    }

    #[test]
    fn escaped_or_separator_is_literal() {
        let f = parsed(r"Title==a\||b");
        assert_eq!(f.groups.len(), 1, "escaped || must not split groups");
    }

    #[test]
    fn blank_group_segment_is_dropped() {
        let f = parsed("( || ),A==1");
        assert_eq!(shape(&f), vec![vec!["A==1"]]);
    }

    #[test]
    fn whitespace_around_separators_is_trimmed() {
        let f = parsed("Title==D, (Title|LikeCount)==3");
        assert_eq!(
            shape(&f),
            vec![vec!["Title==D", "Title|LikeCount==3"]]
        );
    }

    #[test]
    fn operator_modifiers_survive_the_grammar() {
        let f = parsed("(Title@=*a || Author!_=x),Id>=2");
        let t = &f.groups[0].terms[0];
        assert_eq!(t.operator, FilterOperator::Contains);
        assert!(t.case_insensitive);
        let t = &f.groups[1].terms[0];
        assert!(t.negated);
    }

    #[test]
    fn parse_is_idempotent_on_normalized_input() {
        let a = parsed("(A==1 || B==2),C==3");
        let b = parsed("(A==1 || B==2),C==3");
        assert_eq!(a, b);
    }

    #[test]
    fn sorts_parse_in_order() {
        let sorts = parse_sorts("Title,-LikeCount, CreatedDate");
        assert_eq!(
            sorts
                .iter()
                .map(|s| (s.name.as_str(), s.descending))
                .collect::<Vec<_>>(),
            vec![("Title", false), ("LikeCount", true), ("CreatedDate", false)]
        );
    }

    #[test]
    fn duplicate_sort_names_keep_first() {
        let sorts = parse_sorts("Title,-Title,LikeCount");
        assert_eq!(sorts.len(), 2);
        assert!(!sorts[0].descending, "first occurrence wins");
    }

    #[test]
    fn blank_sort_entries_are_dropped() {
        assert!(parse_sorts(" , ,").is_empty());
    }
}
