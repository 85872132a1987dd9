//! The invariant-enforcement pass.
//!
//! Rewrites a flattened document so it satisfies the installer's structural
//! rules: every component has one key path, empty and per-user directories can
//! be created and removed, shortcut icons are shared, absolute install roots
//! are expressed through properties and 64-bit packages mark their components.
//!
//! Each stage is a plain function over `&mut Document` and can be run on its
//! own. [`run`] applies them in order: key path and folder handling come
//! before icons, install roots and bitness, and parent chain components are
//! created before the user profile sweep looks at them.

use std::collections::{BTreeMap, BTreeSet};

use wxsforge_contracts::{
    DEFAULT_FEATURE_ID, EMPTY_DIRECTORY_COMPONENT_SUFFIX, USER_PROFILE_REGISTRY_KEY,
    USER_PROFILE_REGISTRY_ROOT,
};

use crate::consts::{is_path_rooted, is_protected_root, is_user_profile_folder, path_leaf};
use crate::context::BuildContext;
use crate::diagnostics::{InsertionLog, Rule};
use crate::directives::expand_directives;
use crate::doc::{Document, NodeId, NodeKind};
use crate::error::{BuildError, Result};
use crate::ids::expand_id;
use crate::normalize::resolve_shortcut_working_dirs;
use crate::options::AutoElementsOptions;

pub fn run(
    doc: &mut Document,
    ctx: &mut BuildContext,
    opts: &AutoElementsOptions,
    log: &mut InsertionLog,
) -> Result<()> {
    let product = doc.product().ok_or(BuildError::MissingProduct)?;

    let applied = expand_directives(doc)?;
    if applied > 0 {
        log.record(
            Rule::Directive,
            doc.path_of(product),
            format!("applied {applied} custom attribute directive(s)"),
        );
    }

    enforce_key_paths(doc, opts, log);
    handle_empty_directories(doc, product, ctx, opts, log);
    create_parent_chain_components(doc, product, ctx, opts, log);
    handle_user_profile(doc, product, ctx, opts, log);
    resolve_shortcut_working_dirs(doc, product, log);
    force_user_profile_registry(doc, opts, log);
    ensure_feature_mapping(doc, product, log);
    inject_shortcut_icons(doc, product, ctx, log);
    handle_absolute_install_roots(doc, product, log);
    inject_platform_attributes(doc, product, log);

    tracing::info!(insertions = log.len(), "auto elements applied");
    Ok(())
}

/// A component without a nested key path and without files becomes
/// its own key path.
pub fn enforce_key_paths(doc: &mut Document, opts: &AutoElementsOptions, log: &mut InsertionLog) {
    for comp in doc.find_all(&NodeKind::Component) {
        if !contains_files(doc, comp) {
            ensure_key_path(doc, comp, opts, log);
        }
    }
}

/// Components without files get a `CreateFolder`, and their directory
/// gets exactly one `RemoveFolder`. Directories of `.EmptyDirectory`
/// placeholder components seed the parent chain.
pub fn handle_empty_directories(
    doc: &mut Document,
    product: NodeId,
    ctx: &mut BuildContext,
    opts: &AutoElementsOptions,
    log: &mut InsertionLog,
) {
    if !opts.empty_directories_enabled() {
        return;
    }

    let placeholder_dirs: Vec<NodeId> = doc
        .descendants_of_kind(product, &NodeKind::Directory)
        .into_iter()
        .filter(|dir| {
            doc.children_of_kind(*dir, &NodeKind::Component)
                .into_iter()
                .any(|c| {
                    doc.id_of(c)
                        .is_some_and(|id| id.ends_with(EMPTY_DIRECTORY_COMPONENT_SUFFIX))
                })
        })
        .collect();
    for dir in placeholder_dirs {
        insert_parent_chain_components(doc, dir, ctx, opts, log);
    }

    for dir in doc.descendants_of_kind(product, &NodeKind::Directory) {
        for comp in doc.children_of_kind(dir, &NodeKind::Component) {
            if contains_files(doc, comp) {
                continue;
            }
            insert_create_folder(doc, comp, opts, log);
            if !contains_any_remove_folder(doc, dir) {
                insert_remove_folder(doc, dir, comp, log);
            }
        }
    }
}

/// Gives every component-less ancestor of a directory holding a content-free
/// component its own placeholder component, up to a protected root, so the
/// whole chain can be removed at uninstall.
pub fn create_parent_chain_components(
    doc: &mut Document,
    product: NodeId,
    ctx: &mut BuildContext,
    opts: &AutoElementsOptions,
    log: &mut InsertionLog,
) {
    let mut dirs: Vec<NodeId> = Vec::new();
    for dir in doc.descendants_of_kind(product, &NodeKind::Directory) {
        let needs_chain = doc
            .children_of_kind(dir, &NodeKind::Component)
            .into_iter()
            .any(|c| !contains_files_or_registries(doc, c));
        if needs_chain {
            dirs.push(dir);
        }
    }
    for dir in dirs {
        insert_parent_chain_components(doc, dir, ctx, opts, log);
    }
}

fn insert_parent_chain_components(
    doc: &mut Document,
    dir: NodeId,
    ctx: &mut BuildContext,
    opts: &AutoElementsOptions,
    log: &mut InsertionLog,
) {
    let mut parent = doc.ancestor_of_kind(dir, &NodeKind::Directory);
    while let Some(p) = parent {
        if doc.first_child_of_kind(p, &NodeKind::Component).is_none() {
            if doc.id_of(p).is_some_and(is_protected_root) {
                break;
            }
            create_component_for(doc, p, ctx, opts, log);
        }
        parent = doc.ancestor_of_kind(p, &NodeKind::Directory);
    }
}

/// Key paths for content-free components, per-user folder removal and
/// registry markers, and advertised shortcut key paths, in one sweep over the
/// directories in document order.
pub fn handle_user_profile(
    doc: &mut Document,
    product: NodeId,
    ctx: &mut BuildContext,
    opts: &AutoElementsOptions,
    log: &mut InsertionLog,
) {
    for dir in doc.descendants_of_kind(product, &NodeKind::Directory) {
        let comps = doc.children_of_kind(dir, &NodeKind::Component);

        for comp in &comps {
            if !contains_files_or_registries(doc, *comp) {
                ensure_key_path(doc, *comp, opts, log);
                if !contains_any_remove_folder(doc, dir) {
                    insert_remove_folder(doc, dir, *comp, log);
                }
            }
        }

        let in_profile = in_user_profile(doc, dir);
        for comp in &comps {
            let comp = *comp;
            if in_profile {
                if !contains_any_remove_folder(doc, dir) {
                    insert_remove_folder(doc, dir, comp, log);
                }
                if !contains_user_profile_registry(doc, comp) {
                    insert_dummy_user_profile_registry(doc, comp, opts, log);
                }
            } else if contains_non_advertised_shortcuts(doc, comp)
                && !contains_user_profile_registry(doc, comp)
            {
                insert_dummy_user_profile_registry(doc, comp, opts, log);
            }

            for file in doc.children_of_kind(comp, &NodeKind::File) {
                if contains_advertised_shortcuts(doc, file)
                    && !contains_user_profile_registry(doc, comp)
                    && !doc.has_attr(file, "KeyPath")
                {
                    doc.set_attr(file, "KeyPath", "yes");
                    log.record(Rule::FileKeyPath, doc.path_of(file), "KeyPath=yes (advertised shortcut)");
                }
            }
        }

        if comps.is_empty() && in_profile && !is_user_profile_root(doc, dir) {
            let comp = create_component_for(doc, dir, ctx, opts, log);
            if !contains_any_remove_folder(doc, dir) {
                insert_remove_folder(doc, dir, comp, log);
            }
            if !contains_user_profile_registry(doc, comp) {
                insert_dummy_user_profile_registry(doc, comp, opts, log);
            }
        }
    }
}

pub fn force_user_profile_registry(doc: &mut Document, opts: &AutoElementsOptions, log: &mut InsertionLog) {
    if !opts.force_user_profile_registry {
        return;
    }
    for comp in doc.find_all(&NodeKind::Component) {
        if !contains_user_profile_registry(doc, comp) {
            insert_user_profile_reg_value(doc, comp, log);
        }
    }
}

/// Every component must belong to a feature. Without any feature a default
/// `Complete` one is created; unmapped components go to the first feature.
pub fn ensure_feature_mapping(doc: &mut Document, product: NodeId, log: &mut InsertionLog) {
    if doc.is(product, &NodeKind::Module) {
        return;
    }

    let features = doc.find_all(&NodeKind::Feature);
    let target = match features.first() {
        Some(f) => *f,
        None => {
            let f = doc.append_with(
                product,
                NodeKind::Feature,
                &[("Id", DEFAULT_FEATURE_ID), ("Title", DEFAULT_FEATURE_ID), ("Level", "1")],
            );
            log.record(Rule::FeatureMapping, doc.path_of(f), "default feature");
            f
        }
    };

    let referenced: BTreeSet<String> = doc
        .find_all(&NodeKind::ComponentRef)
        .into_iter()
        .filter_map(|r| doc.id_of(r).map(str::to_string))
        .collect();
    let unmapped: Vec<String> = doc
        .descendants_of_kind(product, &NodeKind::Component)
        .into_iter()
        .filter_map(|c| doc.id_of(c).map(str::to_string))
        .filter(|id| !referenced.contains(id))
        .collect();
    for id in unmapped {
        let r = doc.append_with(target, NodeKind::ComponentRef, &[("Id", &id)]);
        log.record(Rule::FeatureMapping, doc.path_of(r), format!("mapped component {id}"));
    }
}

/// One `Icon` per distinct shortcut icon file.
pub fn inject_shortcut_icons(
    doc: &mut Document,
    product: NodeId,
    ctx: &mut BuildContext,
    log: &mut InsertionLog,
) {
    let existing: Vec<NodeId> = doc.find_all(&NodeKind::Icon);
    let mut icon_ids: BTreeSet<String> = existing
        .iter()
        .filter_map(|i| doc.id_of(*i).map(str::to_string))
        .collect();
    let mut by_source: BTreeMap<String, String> = BTreeMap::new();
    for icon in &existing {
        if let (Some(id), Some(src)) = (doc.id_of(*icon), doc.attr(*icon, "SourceFile")) {
            by_source
                .entry(src.to_string())
                .or_insert_with(|| id.to_string());
        }
    }

    let shortcuts: Vec<NodeId> = doc
        .find_all(&NodeKind::Shortcut)
        .into_iter()
        .filter(|s| doc.attr(*s, "Icon").is_some_and(|icon| !icon_ids.contains(icon)))
        .collect();

    let mut index = 1;
    for shortcut in shortcuts {
        let Some(file) = doc.attr(shortcut, "Icon").map(str::to_string) else {
            continue;
        };
        let icon_id = match by_source.get(&file) {
            Some(id) => id.clone(),
            None => {
                let leaf = expand_id(path_leaf(&file));
                let mut id = format!("IconFile{index}_{leaf}");
                while icon_ids.contains(&id) || ctx.ids.is_taken(&id) {
                    index += 1;
                    id = format!("IconFile{index}_{leaf}");
                }
                index += 1;
                ctx.ids.reserve(&id);
                let icon = doc.append_with(product, NodeKind::Icon, &[("Id", &id), ("SourceFile", &file)]);
                log.record(Rule::ShortcutIcon, doc.path_of(icon), file.clone());
                icon_ids.insert(id.clone());
                by_source.insert(file, id.clone());
                id
            }
        };
        doc.set_attr(shortcut, "Icon", &icon_id);
    }
}

/// Rooted names on top-level directories are set at install time through
/// custom actions.
pub fn handle_absolute_install_roots(doc: &mut Document, product: NodeId, log: &mut InsertionLog) {
    let Some(top) = doc.first_child_of_kind(product, &NodeKind::Directory) else {
        return;
    };
    let roots = doc.children_of_kind(top, &NodeKind::Directory);
    let first = roots.first().copied();

    let mut count: Option<u32> = None;
    for dir in roots {
        let Some(absolute) = doc.attr(dir, "Name").filter(|n| is_path_rooted(n)).map(str::to_string) else {
            continue;
        };
        let suffix = count.map(|n| n.to_string()).unwrap_or_default();
        let dir_id = doc.id_of(dir).unwrap_or_default().to_string();

        if Some(dir) == first {
            doc.append_with(
                product,
                NodeKind::Property,
                &[("Id", "INSTALLDIR_ABSOLUTEPATH"), ("Value", &absolute)],
            );
        }

        let token = format!("ABSOLUTEPATH{suffix}");
        doc.set_attr(dir, "Name", &token);

        let action = format!("Set_DirAbsolutePath{suffix}");
        doc.append_with(
            product,
            NodeKind::CustomAction,
            &[("Id", &action), ("Property", &dir_id), ("Value", &absolute)],
        );

        let sequences = [
            (NodeKind::InstallExecuteSequence, "UILevel < 5"),
            (NodeKind::InstallUISequence, "UILevel = 5"),
        ];
        for (kind, ui_level) in sequences {
            let seq = doc.select_or_create(product, kind);
            let custom = doc.append_with(
                seq,
                NodeKind::Custom,
                &[("Action", &action), ("Before", "AppSearch")],
            );
            doc.node_mut(custom).text = Some(format!(
                "(NOT Installed) AND ({ui_level}) AND ({dir_id} = {token})"
            ));
        }

        log.record(
            Rule::AbsoluteInstallRoot,
            doc.path_of(dir),
            format!("{absolute} -> {token}"),
        );
        count = Some(count.unwrap_or(0) + 1);
    }
}

/// `Win64=yes` on every component of an x64 package.
pub fn inject_platform_attributes(doc: &mut Document, product: NodeId, log: &mut InsertionLog) {
    let is_x64 = doc
        .first_child_of_kind(product, &NodeKind::Package)
        .is_some_and(|p| doc.attr_is(p, "Platform", "x64"));
    if !is_x64 {
        return;
    }
    for comp in doc.find_all(&NodeKind::Component) {
        if !doc.has_attr(comp, "Win64") {
            doc.set_attr(comp, "Win64", "yes");
            log.record(Rule::Platform, doc.path_of(comp), "Win64=yes");
        }
    }
}

fn ensure_key_path(doc: &mut Document, comp: NodeId, opts: &AutoElementsOptions, log: &mut InsertionLog) {
    if opts.disable_auto_key_path || has_key_path_elements(doc, comp) {
        return;
    }
    if doc.set_attr(comp, "KeyPath", "yes") {
        log.record(Rule::KeyPath, doc.path_of(comp), "KeyPath=yes");
    }
}

fn insert_create_folder(doc: &mut Document, comp: NodeId, opts: &AutoElementsOptions, log: &mut InsertionLog) {
    let has_plain = doc
        .children_of_kind(comp, &NodeKind::CreateFolder)
        .into_iter()
        .any(|cf| !doc.has_attr(cf, "Directory"));
    if !has_plain {
        let cf = doc.append(comp, NodeKind::CreateFolder);
        log.record(Rule::CreateFolder, doc.path_of(cf), "empty directory");
    }
    ensure_key_path(doc, comp, opts, log);
}

fn insert_remove_folder(doc: &mut Document, dir: NodeId, comp: NodeId, log: &mut InsertionLog) {
    if is_user_profile_root(doc, dir) {
        return;
    }
    let dir_id = doc.id_of(dir).unwrap_or_default().to_string();
    let present = doc
        .children_of_kind(comp, &NodeKind::RemoveFolder)
        .into_iter()
        .any(|rf| doc.attr_is(rf, "Id", &dir_id));
    if !present {
        let rf = doc.append_with(comp, NodeKind::RemoveFolder, &[("Id", &dir_id), ("On", "uninstall")]);
        log.record(Rule::RemoveFolder, doc.path_of(rf), "On=uninstall");
    }
}

fn insert_dummy_user_profile_registry(
    doc: &mut Document,
    comp: NodeId,
    opts: &AutoElementsOptions,
    log: &mut InsertionLog,
) {
    if !opts.disable_auto_user_profile_registry {
        insert_user_profile_reg_value(doc, comp, log);
    }
}

/// Adds the per-user registry marker and makes it the component's only key path.
pub fn insert_user_profile_reg_value(doc: &mut Document, comp: NodeId, log: &mut InsertionLog) {
    for d in doc.descendants(comp) {
        doc.remove_attr(d, "KeyPath");
    }
    doc.remove_attr(comp, "KeyPath");

    let key = doc.append_with(
        comp,
        NodeKind::RegistryKey,
        &[("Root", USER_PROFILE_REGISTRY_ROOT), ("Key", USER_PROFILE_REGISTRY_KEY)],
    );
    doc.append_with(
        key,
        NodeKind::RegistryValue,
        &[("Value", "0"), ("Type", "string"), ("KeyPath", "yes")],
    );
    log.record(
        Rule::UserProfileRegistry,
        doc.path_of(key),
        format!("{USER_PROFILE_REGISTRY_ROOT}\\{USER_PROFILE_REGISTRY_KEY}"),
    );
}

/// Synthesizes a content-free component in `dir`, referenced from every
/// feature. With empty directory support on it also creates its folder.
fn create_component_for(
    doc: &mut Document,
    dir: NodeId,
    ctx: &mut BuildContext,
    opts: &AutoElementsOptions,
    log: &mut InsertionLog,
) -> NodeId {
    let taken: BTreeSet<String> = doc
        .find_all(&NodeKind::Component)
        .into_iter()
        .filter_map(|c| doc.id_of(c).map(str::to_string))
        .collect();
    let mut id = doc.id_of(dir).unwrap_or("Component").to_string();
    while taken.contains(&id) {
        id.push('_');
    }
    ctx.ids.reserve(&id);
    let guid = ctx.guids.next_guid(&id).to_string();

    let comp = doc.append_with(dir, NodeKind::Component, &[("Id", &id), ("Guid", &guid)]);
    for feature in doc.find_all(&NodeKind::Feature) {
        doc.append_with(feature, NodeKind::ComponentRef, &[("Id", &id)]);
    }
    log.record(Rule::PlaceholderComponent, doc.path_of(comp), format!("Guid={guid}"));
    if opts.empty_directories_enabled() {
        insert_create_folder(doc, comp, opts, log);
    }
    comp
}

fn has_key_path_elements(doc: &Document, comp: NodeId) -> bool {
    doc.descendants(comp)
        .into_iter()
        .any(|d| doc.attr_is(d, "KeyPath", "yes"))
}

fn contains_files(doc: &Document, comp: NodeId) -> bool {
    doc.first_child_of_kind(comp, &NodeKind::File).is_some()
}

fn contains_files_or_registries(doc: &Document, comp: NodeId) -> bool {
    contains_files(doc, comp) || doc.first_child_of_kind(comp, &NodeKind::RegistryKey).is_some()
}

/// `RemoveFolder` is only ever placed in a component directly under the directory.
fn contains_any_remove_folder(doc: &Document, dir: NodeId) -> bool {
    doc.children_of_kind(dir, &NodeKind::Component)
        .into_iter()
        .any(|c| doc.first_child_of_kind(c, &NodeKind::RemoveFolder).is_some())
}

fn contains_user_profile_registry(doc: &Document, comp: NodeId) -> bool {
    doc.children_of_kind(comp, &NodeKind::RegistryKey)
        .into_iter()
        .any(|k| doc.attr_is(k, "Key", USER_PROFILE_REGISTRY_KEY))
}

fn is_advertised(doc: &Document, shortcut: NodeId) -> bool {
    doc.attr_is(shortcut, "Advertise", "yes")
}

fn contains_advertised_shortcuts(doc: &Document, node: NodeId) -> bool {
    doc.descendants_of_kind(node, &NodeKind::Shortcut)
        .into_iter()
        .any(|s| is_advertised(doc, s))
}

fn contains_non_advertised_shortcuts(doc: &Document, node: NodeId) -> bool {
    doc.descendants_of_kind(node, &NodeKind::Shortcut)
        .into_iter()
        .any(|s| !is_advertised(doc, s))
}

fn profile_name(doc: &Document, dir: NodeId) -> Option<&str> {
    doc.attr(dir, "Name").or_else(|| doc.id_of(dir))
}

fn is_user_profile_root(doc: &Document, dir: NodeId) -> bool {
    profile_name(doc, dir).is_some_and(is_user_profile_folder)
}

fn in_user_profile(doc: &Document, dir: NodeId) -> bool {
    std::iter::once(dir)
        .chain(doc.ancestors(dir))
        .filter(|n| doc.is(*n, &NodeKind::Directory))
        .any(|n| is_user_profile_root(doc, n))
}
