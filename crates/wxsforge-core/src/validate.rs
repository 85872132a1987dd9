//! Structural pre-check run before any rewriting.

use std::collections::BTreeSet;

use wxsforge_contracts::INSTALL_DIR_ID;

use crate::consts::env_constant;
use crate::doc::{Document, NodeId, NodeKind};
use crate::error::{BuildError, Result};

pub fn precheck(doc: &Document) -> Result<NodeId> {
    let product = single_product(doc)?;
    check_install_dirs(doc)?;
    check_env_tokens(doc)?;
    check_explicit_ids(doc)?;
    Ok(product)
}

fn single_product(doc: &Document) -> Result<NodeId> {
    let mut products = doc.find_all(&NodeKind::Product);
    products.extend(doc.find_all(&NodeKind::Module));
    match products.len() {
        0 => Err(BuildError::MissingProduct),
        1 => doc.product().ok_or(BuildError::MissingProduct),
        n => Err(BuildError::MultipleProducts(n)),
    }
}

fn check_install_dirs(doc: &Document) -> Result<()> {
    let marked: Vec<String> = doc
        .find_all(&NodeKind::Directory)
        .into_iter()
        .filter(|d| doc.node(*d).install_dir || doc.attr_is(*d, "Id", INSTALL_DIR_ID))
        .map(|d| doc.path_of(d))
        .collect();
    if marked.len() > 1 {
        return Err(BuildError::MultipleInstallDirs(marked));
    }
    Ok(())
}

fn check_env_tokens(doc: &Document) -> Result<()> {
    for dir in doc.find_all(&NodeKind::Directory) {
        let Some(name) = doc.attr(dir, "Name") else {
            continue;
        };
        for token in percent_tokens(name) {
            if token != "%INSTALLDIR%" && env_constant(token).is_none() {
                return Err(BuildError::UnknownEnvironmentConstant {
                    name: name.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// `%Word%` spans in `text`. A lone `%` (as in `100%`) is not a token.
pub(crate) fn percent_tokens(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = text;
    let mut offset = 0;
    while let Some(start) = rest.find('%') {
        let after = &rest[start + 1..];
        let Some(len) = after.find('%') else {
            break;
        };
        let word = &after[..len];
        if !word.is_empty() && word.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            let begin = offset + start;
            let end = begin + len + 2;
            out.push(&text[begin..end]);
            offset = end;
            rest = &text[end..];
        } else {
            offset += start + 1;
            rest = &text[offset..];
        }
    }
    out
}

/// Element kinds whose `Id` refers to another element instead of naming this one.
pub(crate) fn is_reference_kind(kind: &NodeKind) -> bool {
    matches!(kind, NodeKind::ComponentRef) || kind.as_str().ends_with("Ref")
}

fn check_explicit_ids(doc: &Document) -> Result<()> {
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
    let mut all = vec![doc.root()];
    all.extend(doc.descendants(doc.root()));
    for n in all {
        let kind = doc.kind(n);
        if is_reference_kind(kind) {
            continue;
        }
        if let Some(id) = doc.id_of(n) {
            if !seen.insert((kind.as_str().to_string(), id.to_string())) {
                return Err(BuildError::DuplicateId {
                    kind: kind.to_string(),
                    id: id.to_string(),
                });
            }
        }
    }
    Ok(())
}
