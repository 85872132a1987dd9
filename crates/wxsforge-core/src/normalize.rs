//! Post-processing normalizers applied to an already consistent document.

use std::path::{Component, Path, PathBuf};

use indexmap::IndexMap;

use crate::consts::{bracket_env_consts, expand_env_consts, is_path_rooted};
use crate::diagnostics::{InsertionLog, Rule};
use crate::doc::{Document, NodeId, NodeKind};
use crate::options::PathMode;

/// Source-file bearing attributes, per element name.
pub const SOURCE_FILE_ATTRIBUTES: &[(&str, &str)] = &[
    ("Icon", "SourceFile"),
    ("File", "Source"),
    ("Merge", "SourceFile"),
    ("Binary", "SourceFile"),
    ("EmbeddedUI", "SourceFile"),
    ("Payload", "SourceFile"),
    ("MsiPackage", "SourceFile"),
    ("ExePackage", "SourceFile"),
];

fn needs_property(value: &str) -> bool {
    value.contains('\\')
        || value.contains("//")
        || value.contains('%')
        || value.contains('[')
        || value.contains(']')
}

/// Shortcut working directories must name a directory or property id.
///
/// `%INSTALLDIR%` and `[INSTALLDIR]` become `INSTALLDIR`; any other path is
/// stored in a `Property` (reused when one already holds the same value) and
/// the shortcut points at that property.
pub fn resolve_shortcut_working_dirs(doc: &mut Document, product: NodeId, log: &mut InsertionLog) {
    for shortcut in doc.descendants_of_kind(product, &NodeKind::Shortcut) {
        let Some(wd) = doc
            .attr(shortcut, "WorkingDirectory")
            .filter(|v| needs_property(v))
            .map(str::to_string)
        else {
            continue;
        };

        let resolved = if wd.len() > 1 && wd.starts_with('%') && wd.ends_with('%') {
            expand_env_consts(&wd).replace('%', "")
        } else if wd.starts_with('[') && wd.ends_with(']') {
            wd.replace(['[', ']'], "")
        } else {
            let path = bracket_env_consts(&wd);
            let existing = doc
                .descendants_of_kind(product, &NodeKind::Property)
                .into_iter()
                .find(|p| doc.attr_is(*p, "Value", &wd) || doc.attr_is(*p, "Value", &path))
                .and_then(|p| doc.id_of(p).map(str::to_string));
            match existing {
                Some(prop_id) => prop_id,
                None => {
                    let prop_id = format!("{}.WorkDir", doc.id_of(shortcut).unwrap_or("Shortcut"));
                    let prop = doc.append_with(
                        product,
                        NodeKind::Property,
                        &[("Id", &prop_id), ("Value", &path)],
                    );
                    log.record(Rule::WorkingDirectory, doc.path_of(prop), path.clone());
                    prop_id
                }
            }
        };
        doc.set_attr(shortcut, "WorkingDirectory", &resolved);
    }
}

/// Rewrites every source-file attribute to an absolute path or to a path
/// relative to `base_dir`. `base_dir` must be absolute. Values holding
/// preprocessor or binder variables are left alone, and so are rooted values
/// the host cannot resolve, such as drive-letter or UNC paths on a Unix host.
pub fn normalize_file_paths(doc: &mut Document, base_dir: &Path, mode: PathMode) {
    let base = lexical_normalize(base_dir);
    for (element, attribute) in SOURCE_FILE_ATTRIBUTES {
        let kind = NodeKind::from_name(element);
        for node in doc.find_all(&kind) {
            let Some(value) = doc.attr(node, attribute).map(str::to_string) else {
                continue;
            };
            if value.is_empty() || value.contains('[') || value.contains("$(") || value.contains("!(") {
                continue;
            }
            if is_path_rooted(&value) && !Path::new(&value).is_absolute() {
                continue;
            }
            let absolute = lexical_normalize(&base.join(&value));
            let rewritten = match mode {
                PathMode::Absolute => absolute,
                PathMode::Relative => relative_to(&absolute, &base).unwrap_or(absolute),
            };
            doc.set_attr(node, attribute, &rewritten.to_string_lossy());
        }
    }
}

/// Resolves `.` and `..` without touching the filesystem.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(comp),
            },
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return PathBuf::from(".");
    }
    parts.iter().collect()
}

/// `None` when the two paths do not share a root (different drives).
pub fn relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    let path: Vec<Component<'_>> = path.components().collect();
    let base: Vec<Component<'_>> = base.components().collect();
    if path.first() != base.first() {
        return None;
    }
    let common = path
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut out = PathBuf::new();
    for _ in common..base.len() {
        out.push("..");
    }
    for comp in &path[common..] {
        out.push(comp.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    Some(out)
}

fn order_class(kind: &str) -> Option<usize> {
    match kind {
        "CustomAction" => Some(0),
        "Binary" => Some(1),
        "UIRef" => Some(2),
        "Property" => Some(3),
        "Feature" => Some(4),
        k if k.ends_with("Sequence") => Some(5),
        _ => None,
    }
}

/// Moves `CustomAction`, `Binary`, `UIRef`, `Property`, `Feature` and
/// `*Sequence` children to the end of the product, in that order.
pub fn order_product_elements(doc: &mut Document, product: NodeId) {
    let mut moving: Vec<(usize, NodeId)> = doc
        .children(product)
        .iter()
        .filter_map(|c| order_class(doc.kind(*c).as_str()).map(|class| (class, *c)))
        .collect();
    moving.sort_by_key(|(class, _)| *class);
    tracing::debug!(moved = moving.len(), "product elements ordered");
    for (_, child) in moving {
        doc.attach(product, child);
    }
}

/// Turns the product into a merge module: features and media are dropped,
/// the element becomes `Module` and the package takes over the product
/// identity.
pub fn convert_to_module(doc: &mut Document, product: NodeId, log: &mut InsertionLog) {
    if doc.is(product, &NodeKind::Module) {
        return;
    }
    for child in doc.children(product).to_vec() {
        if matches!(doc.kind(child), NodeKind::Feature | NodeKind::Media) {
            doc.detach(child);
        }
    }

    let product_attrs = std::mem::take(&mut doc.node_mut(product).attributes);
    let mut module_attrs = IndexMap::new();
    if let Some(name) = product_attrs.get("Name") {
        module_attrs.insert("Id".to_string(), name.clone());
    }
    for copied in ["Codepage", "Language", "Version"] {
        if let Some(value) = product_attrs.get(copied) {
            module_attrs.insert(copied.to_string(), value.clone());
        }
    }
    let node = doc.node_mut(product);
    node.kind = NodeKind::Module;
    node.attributes = module_attrs;

    if let Some(package) = doc.first_child_of_kind(product, &NodeKind::Package) {
        for copied in ["Id", "Manufacturer"] {
            if let Some(value) = product_attrs.get(copied) {
                doc.set_attr(package, copied, value);
            }
        }
        doc.remove_attr(package, "Compressed");
    }
    log.record(Rule::MergeModule, doc.path_of(product), "Product -> Module");
}
