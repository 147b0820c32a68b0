//! Variable templating for strings
//!
//! Replaces `${var}` references against a compiled variable mapping. A
//! reference to a name the mapping does not contain resolves to the empty
//! string, so partially compiled text stays usable.

use crate::taskfile::Vars;
use regex::Regex;

const MAX_PASSES: usize = 32;

/// Template variables in a string
///
/// Values may themselves contain `${...}` references; passes repeat until the
/// text settles. Reference cycles are cut off after a bounded number of
/// passes and the leftover references resolve empty.
pub fn template(input: &str, vars: &Vars) -> String {
    let re = Regex::new(r"\$\{([^}]+)\}").unwrap();

    let mut result = input.to_string();
    for pass in 0..=MAX_PASSES {
        if !re.is_match(&result) {
            break;
        }
        let last = pass == MAX_PASSES;
        result = re
            .replace_all(&result, |caps: &regex::Captures| {
                let name = &caps[1];
                match vars.get_value(name) {
                    Some(value) if !last => value.to_string(),
                    _ => String::new(),
                }
            })
            .to_string();
    }

    result
}

/// Template a list of strings
pub fn template_list(list: &[String], vars: &Vars) -> Vec<String> {
    list.iter().map(|s| template(s, vars)).collect()
}

/// Template an optional string in place
pub fn template_opt(value: &mut Option<String>, vars: &Vars) {
    if let Some(inner) = value {
        *inner = template(inner, vars);
    }
}
