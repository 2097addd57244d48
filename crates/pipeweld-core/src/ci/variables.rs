//! Variable interpolation.
//!
//! Values may reference other variables as `$NAME` or `${NAME}`; `$$`
//! escapes a literal dollar sign. References to undefined variables
//! expand to the empty string. Reference cycles do not error: the
//! reference that closes the cycle is left as its literal unexpanded
//! text, so `VAR: $VAR` resolves to the string `$VAR`.

use std::collections::BTreeMap;

/// Expands every value of a variable map against the map itself.
///
/// The returned map has the same keys; each value has its references
/// resolved. Cycles degrade to literal reference text per the module
/// contract.
#[must_use]
pub fn expand_variables(variables: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    variables
        .iter()
        .map(|(name, value)| {
            let mut in_flight = vec![name.clone()];
            let expanded = expand_with_stack(value, variables, &mut in_flight);
            (name.clone(), expanded)
        })
        .collect()
}

/// Expands a single value against a variable map.
#[must_use]
pub fn expand(value: &str, variables: &BTreeMap<String, String>) -> String {
    let mut in_flight = Vec::new();
    expand_with_stack(value, variables, &mut in_flight)
}

fn expand_with_stack(
    value: &str,
    variables: &BTreeMap<String, String>,
    in_flight: &mut Vec<String>,
) -> String {
    let bytes = value.as_bytes();
    let mut out = String::with_capacity(value.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            let start = i;
            while i < bytes.len() && bytes[i] != b'$' {
                i += 1;
            }
            out.push_str(&value[start..i]);
            continue;
        }
        // Escaped dollar: `$$` -> `$`.
        if bytes.get(i + 1) == Some(&b'$') {
            out.push('$');
            i += 2;
            continue;
        }
        let (name, reference_len) = match parse_reference(&value[i..]) {
            Some(parsed) => parsed,
            None => {
                out.push('$');
                i += 1;
                continue;
            }
        };
        let reference = &value[i..i + reference_len];
        if in_flight.iter().any(|active| active == name) {
            // Cycle: keep the literal reference instead of recursing.
            out.push_str(reference);
        } else if let Some(resolved) = variables.get(name) {
            in_flight.push(name.to_string());
            out.push_str(&expand_with_stack(resolved, variables, in_flight));
            in_flight.pop();
        }
        // Undefined references expand to nothing.
        i += reference_len;
    }
    out
}

/// Parses `$NAME` or `${NAME}` at the start of `text` (which begins with
/// `$`). Returns the referenced name and the byte length of the whole
/// reference, or `None` when no well-formed reference follows.
fn parse_reference(text: &str) -> Option<(&str, usize)> {
    let bytes = text.as_bytes();
    if bytes.get(1) == Some(&b'{') {
        let end = text[2..].find('}')?;
        let name = &text[2..2 + end];
        if name.is_empty() || !is_identifier(name) {
            return None;
        }
        return Some((name, end + 3));
    }
    let mut end = 1;
    while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
        end += 1;
    }
    if end == 1 {
        return None;
    }
    Some((&text[1..end], end))
}

fn is_identifier(name: &str) -> bool {
    name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn plain_text_is_unchanged() {
        assert_eq!(expand("hello world", &BTreeMap::new()), "hello world");
    }

    #[test]
    fn simple_reference() {
        let ctx = vars(&[("NAME", "pipeweld")]);
        assert_eq!(expand("run $NAME now", &ctx), "run pipeweld now");
        assert_eq!(expand("run ${NAME} now", &ctx), "run pipeweld now");
    }

    #[test]
    fn undefined_reference_expands_to_empty() {
        assert_eq!(expand("a${MISSING}b", &BTreeMap::new()), "ab");
        assert_eq!(expand("a$MISSING b", &BTreeMap::new()), "a b");
    }

    #[test]
    fn escaped_dollar() {
        let ctx = vars(&[("NAME", "x")]);
        assert_eq!(expand("$$NAME", &ctx), "$NAME");
    }

    #[test]
    fn nested_references_resolve() {
        let ctx = vars(&[("A", "$B"), ("B", "deep")]);
        assert_eq!(expand("$A", &ctx), "deep");
    }

    #[test]
    fn self_reference_stays_literal() {
        let ctx = vars(&[("VAR", "$VAR")]);
        let expanded = expand_variables(&ctx);
        assert_eq!(expanded.get("VAR").unwrap(), "$VAR");
    }

    #[test]
    fn two_step_cycle_stays_literal() {
        let ctx = vars(&[("A", "$B"), ("B", "$A")]);
        let expanded = expand_variables(&ctx);
        // Expanding A recurses into B, whose reference back to A is kept
        // literal.
        assert_eq!(expanded.get("A").unwrap(), "$A");
        assert_eq!(expanded.get("B").unwrap(), "$B");
    }

    #[test]
    fn dangling_dollar_is_literal() {
        assert_eq!(expand("cost: 5$", &BTreeMap::new()), "cost: 5$");
        assert_eq!(expand("${", &BTreeMap::new()), "${");
        assert_eq!(expand("${}", &BTreeMap::new()), "${}");
    }

    #[test]
    fn expand_variables_expands_every_value() {
        let ctx = vars(&[("BASE", "/srv"), ("PATH_A", "$BASE/a"), ("PATH_B", "$BASE/b")]);
        let expanded = expand_variables(&ctx);
        assert_eq!(expanded.get("PATH_A").unwrap(), "/srv/a");
        assert_eq!(expanded.get("PATH_B").unwrap(), "/srv/b");
    }
}
