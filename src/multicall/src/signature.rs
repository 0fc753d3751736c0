//! Parsing of compound call signatures such as `balanceOf(address)(uint256)`.
//!
//! The first parenthesised group holds the input types, the second one the
//! output types. Both groups may contain nested tuples and arrays, so groups
//! and their elements are split by tracking the parenthesis depth.

use std::fmt;
use std::str::FromStr;

use ethers_core::abi::param_type::{Reader, Writer};
use ethers_core::abi::ParamType;
use ethers_core::types::Selector;
use ethers_core::utils::id;
use itertools::Itertools;

use crate::error::{MulticallError, Result};

/// A parsed `name(inputs)(outputs)` signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    name: String,
    inputs: Vec<ParamType>,
    outputs: Vec<ParamType>,
    function: String,
    selector: Selector,
}

impl Signature {
    /// Parses a compound signature. Whitespace is ignored.
    pub fn parse(signature: &str) -> Result<Self> {
        let compact: String = signature.chars().filter(|c| !c.is_whitespace()).collect();
        let (name, groups) = split_groups(&compact)?;

        if name.is_empty() {
            return Err(MulticallError::invalid_signature(
                signature,
                "missing function name",
            ));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
            return Err(MulticallError::invalid_signature(
                signature,
                format!("`{name}` is not a valid function name"),
            ));
        }
        let [inputs, outputs] = groups.as_slice() else {
            return Err(MulticallError::invalid_signature(
                signature,
                format!(
                    "expected an input and an output type group, found {} group(s)",
                    groups.len()
                ),
            ));
        };

        let inputs = parse_type_list(signature, inputs)?;
        let outputs = parse_type_list(signature, outputs)?;
        let function = format!("{name}({})", inputs.iter().map(Writer::write).join(","));
        let selector = id(&function);

        Ok(Self {
            name: name.to_owned(),
            inputs,
            outputs,
            function,
            selector,
        })
    }

    /// Function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered input types.
    pub fn inputs(&self) -> &[ParamType] {
        &self.inputs
    }

    /// Ordered output types.
    pub fn outputs(&self) -> &[ParamType] {
        &self.outputs
    }

    /// Canonical function signature, e.g. `balanceOf(address)`, the selector is derived from.
    pub fn function(&self) -> &str {
        &self.function
    }

    /// 4-byte function selector.
    pub fn selector(&self) -> Selector {
        self.selector
    }
}

impl FromStr for Signature {
    type Err = MulticallError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({})",
            self.function,
            self.outputs.iter().map(Writer::write).join(",")
        )
    }
}

/// Splits `name(a)(b)` into `name` and the inner text of every outermost group.
fn split_groups(signature: &str) -> Result<(&str, Vec<&str>)> {
    let Some(name_end) = signature.find('(') else {
        return Err(MulticallError::invalid_signature(
            signature,
            "missing `(`",
        ));
    };

    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut group_start = name_end;

    for (position, character) in signature.char_indices().skip_while(|(i, _)| *i < name_end) {
        match character {
            '(' => {
                if depth == 0 {
                    group_start = position;
                }
                depth += 1;
            }
            ')' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    MulticallError::invalid_signature(signature, "unbalanced `)`")
                })?;
                if depth == 0 {
                    groups.push(&signature[group_start + 1..position]);
                }
            }
            other if depth == 0 => {
                return Err(MulticallError::invalid_signature(
                    signature,
                    format!("unexpected `{other}` between type groups"),
                ));
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(MulticallError::invalid_signature(signature, "unbalanced `(`"));
    }

    Ok((&signature[..name_end], groups))
}

/// Parses the comma separated content of one type group.
fn parse_type_list(signature: &str, group: &str) -> Result<Vec<ParamType>> {
    if group.is_empty() {
        return Ok(Vec::new());
    }

    split_top_level(group)
        .into_iter()
        .map(|type_name| parse_type(signature, type_name))
        .collect()
}

/// Splits on the commas that are not nested in a tuple.
fn split_top_level(group: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (position, character) in group.char_indices() {
        match character {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&group[start..position]);
                start = position + 1;
            }
            _ => {}
        }
    }
    parts.push(&group[start..]);

    parts
}

fn parse_type(signature: &str, type_name: &str) -> Result<ParamType> {
    if type_name.is_empty() {
        return Err(MulticallError::invalid_signature(signature, "empty type"));
    }
    // the ABI reader falls back to `uint8` for names it does not know
    if !is_known_type(type_name) {
        return Err(MulticallError::invalid_signature(
            signature,
            format!("unknown type `{type_name}`"),
        ));
    }
    Reader::read(type_name).map_err(|err| {
        MulticallError::invalid_signature(signature, format!("bad type `{type_name}`: {err}"))
    })
}

/// Elementary ABI types, tuples of known types and arrays of either.
fn is_known_type(type_name: &str) -> bool {
    if let Some(element) = type_name.strip_suffix(']') {
        let Some((element, size)) = element.rsplit_once('[') else {
            return false;
        };
        return size.chars().all(|c| c.is_ascii_digit()) && is_known_type(element);
    }

    if let Some(inner) = type_name
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return inner.is_empty()
            || split_top_level(inner)
                .into_iter()
                .all(|member| !member.is_empty() && is_known_type(member));
    }

    match type_name {
        "address" | "bool" | "string" | "bytes" | "uint" | "int" => true,
        _ => {
            if let Some(size) = type_name.strip_prefix("bytes") {
                return matches!(size.parse::<usize>(), Ok(1..=32)) && !size.starts_with('0');
            }
            let bits = type_name
                .strip_prefix("uint")
                .or_else(|| type_name.strip_prefix("int"));
            bits.filter(|bits| !bits.starts_with('0'))
                .and_then(|bits| bits.parse::<usize>().ok())
                .is_some_and(|bits| bits % 8 == 0 && (8..=256).contains(&bits))
        }
    }
}
