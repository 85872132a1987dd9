//! The build pipeline: pre-check, allocation, invariant enforcement,
//! normalization and emission.

use std::path::PathBuf;

use uuid::Uuid;
use wxsforge_contracts::{INSTALL_DIR_ID, TARGET_DIR_ID};

use crate::auto_elements;
use crate::consts::{env_constant, path_leaf};
use crate::context::BuildContext;
use crate::diagnostics::{Diagnostic, DiagnosticCode, InsertionLog, Report, Rule, Severity, Stage};
use crate::doc::{Document, NodeId, NodeKind};
use crate::emit::emit_wxs;
use crate::error::Result;
use crate::normalize;
use crate::options::{AutoElementsOptions, BuildOptions, OutputOptions, OutputType};
use crate::util::sha256_hex;
use crate::validate::{self, is_reference_kind};

const DUMMY_DIR_CHAIN: [&str; 2] = ["WxsForge", "DummyDir"];

#[derive(Debug)]
pub struct BuildOutput {
    pub document: Document,
    pub wxs: String,
    pub report: Report,
}

pub fn build_document(doc: Document, ctx: &mut BuildContext, opts: &BuildOptions) -> Result<BuildOutput> {
    let product = validate::precheck(&doc)?;

    let mut diagnostics = Vec::new();
    if let Some(warning) = ctx.begin_build(&opts.ids, product_guid_base(&doc, product)) {
        diagnostics.push(Diagnostic::new(
            DiagnosticCode::WXS0002AllocatorMisuse,
            Severity::Warning,
            Stage::Allocate,
            warning,
        ));
    }

    // Ids handed out by this build, finished or not, must not count as early
    // requests for the next one.
    let result = run_pipeline(doc, product, ctx, opts, diagnostics);
    ctx.end_build(&opts.ids);
    result
}

fn run_pipeline(
    mut doc: Document,
    product: NodeId,
    ctx: &mut BuildContext,
    opts: &BuildOptions,
    mut diagnostics: Vec<Diagnostic>,
) -> Result<BuildOutput> {
    let mut log = InsertionLog::default();
    host_orphan_components(&mut doc, product, &opts.auto_elements, &mut log);
    assign_ids(&mut doc, product, ctx);
    auto_elements::run(&mut doc, ctx, &opts.auto_elements, &mut log)?;

    normalize::order_product_elements(&mut doc, product);
    let base_dir = source_base_dir(&opts.output)?;
    normalize::normalize_file_paths(&mut doc, &base_dir, opts.output.path_mode);
    if opts.output.output_type == OutputType::Msm {
        normalize::convert_to_module(&mut doc, product, &mut log);
    }

    let wxs = emit_wxs(&doc);
    let digest = sha256_hex(wxs.as_bytes());
    tracing::info!(nodes = doc.node_count(), insertions = log.len(), sha256 = %digest, "build finished");

    diagnostics.push(
        Diagnostic::new(
            DiagnosticCode::WXS0001BuildSummary,
            Severity::Info,
            Stage::Emit,
            format!("emitted {} elements, {} automatic insertions", doc.node_count(), log.len()),
        )
        .with_data("nodes", doc.node_count())
        .with_data("insertions", log.len()),
    );
    let report = Report::ok()
        .with_diagnostics(diagnostics)
        .with_insertions(log)
        .with_meta("wxs_sha256", digest)
        .with_meta("node_count", doc.node_count());

    Ok(BuildOutput {
        document: doc,
        wxs,
        report,
    })
}

/// Component GUIDs are seeded from the product identity so unrelated
/// packages never share them: `UpgradeCode`, else a concrete product `Id`.
pub fn product_guid_base(doc: &Document, product: NodeId) -> Option<Uuid> {
    ["UpgradeCode", "Id"]
        .into_iter()
        .filter_map(|attr| doc.attr(product, attr))
        .map(str::trim)
        .filter(|value| *value != "*")
        .find_map(|value| Uuid::parse_str(value).ok())
}

fn source_base_dir(opts: &OutputOptions) -> Result<PathBuf> {
    match &opts.source_base_dir {
        Some(dir) if dir.is_absolute() => Ok(dir.clone()),
        Some(dir) => Ok(std::env::current_dir()?.join(dir)),
        None => Ok(std::env::current_dir()?),
    }
}

/// Moves components placed directly under the product into a directory, and
/// gives a directory-less product one.
///
/// The host is the program files folder (64-bit for x64 packages) or, with
/// the legacy layout, `WxsForge\DummyDir` below it.
pub fn host_orphan_components(
    doc: &mut Document,
    product: NodeId,
    opts: &AutoElementsOptions,
    log: &mut InsertionLog,
) {
    let orphans = doc.children_of_kind(product, &NodeKind::Component);
    let has_dirs = doc.first_child_of_kind(product, &NodeKind::Directory).is_some();
    if orphans.is_empty() && has_dirs {
        return;
    }

    let target = doc
        .children_of_kind(product, &NodeKind::Directory)
        .into_iter()
        .find(|d| doc.attr_is(*d, "Id", TARGET_DIR_ID))
        .unwrap_or_else(|| {
            doc.append_with(
                product,
                NodeKind::Directory,
                &[("Id", TARGET_DIR_ID), ("Name", "SourceDir")],
            )
        });

    let is_x64 = doc
        .first_child_of_kind(product, &NodeKind::Package)
        .is_some_and(|p| doc.attr_is(p, "Platform", "x64"));
    let folder = if is_x64 { "ProgramFiles64Folder" } else { "ProgramFilesFolder" };
    let mut host = doc
        .descendants_of_kind(product, &NodeKind::Directory)
        .into_iter()
        .find(|d| doc.attr_is(*d, "Name", folder))
        .unwrap_or_else(|| {
            doc.append_with(target, NodeKind::Directory, &[("Id", folder), ("Name", folder)])
        });

    if opts.legacy_dummy_dir_algorithm {
        for name in DUMMY_DIR_CHAIN {
            host = doc
                .children_of_kind(host, &NodeKind::Directory)
                .into_iter()
                .find(|d| doc.attr_is(*d, "Name", name))
                .unwrap_or_else(|| doc.append_with(host, NodeKind::Directory, &[("Name", name)]));
        }
    }

    for comp in orphans {
        doc.attach(host, comp);
        log.record(Rule::DummyDirectory, doc.path_of(comp), "hosted orphan component");
    }
}

/// Fills in missing identifiers and component GUIDs.
///
/// Explicit ids are reserved first, then directories, files, components,
/// features and shortcuts are named in document order, kind by kind.
pub fn assign_ids(doc: &mut Document, product: NodeId, ctx: &mut BuildContext) {
    let mut all = vec![product];
    all.extend(doc.descendants(product));
    for n in &all {
        if is_reference_kind(doc.kind(*n)) {
            continue;
        }
        if let Some(id) = doc.id_of(*n) {
            ctx.ids.reserve(id);
        }
    }

    for dir in doc.descendants_of_kind(product, &NodeKind::Directory) {
        if let Some(folder) = doc.attr(dir, "Name").and_then(env_constant) {
            doc.set_attr(dir, "Name", folder);
            if !doc.has_attr(dir, "Id") {
                doc.set_attr(dir, "Id", folder);
                ctx.ids.reserve(folder);
            }
            continue;
        }
        if doc.has_attr(dir, "Id") {
            continue;
        }
        let id = if doc.node(dir).install_dir {
            ctx.ids.reserve(INSTALL_DIR_ID);
            INSTALL_DIR_ID.to_string()
        } else {
            let logical = directory_logical_path(doc, dir);
            ctx.ids.allocate(&NodeKind::Directory, &logical)
        };
        doc.set_attr(dir, "Id", &id);
    }

    for file in doc.descendants_of_kind(product, &NodeKind::File) {
        if doc.has_attr(file, "Id") {
            continue;
        }
        let raw = doc
            .attr(file, "Name")
            .or_else(|| doc.attr(file, "Source").map(path_leaf))
            .unwrap_or_default()
            .to_string();
        let id = ctx.ids.allocate(&NodeKind::File, &raw);
        doc.set_attr(file, "Id", &id);
    }

    for comp in doc.descendants_of_kind(product, &NodeKind::Component) {
        if !doc.has_attr(comp, "Id") {
            let first_file = doc
                .first_child_of_kind(comp, &NodeKind::File)
                .and_then(|f| doc.id_of(f));
            let owner = doc
                .ancestor_of_kind(comp, &NodeKind::Directory)
                .and_then(|d| doc.id_of(d));
            let raw = match (first_file, owner) {
                (Some(file), _) => format!("Component.{file}"),
                (None, Some(dir)) => format!("Component.{dir}"),
                (None, None) => String::new(),
            };
            let id = ctx.ids.allocate(&NodeKind::Component, &raw);
            doc.set_attr(comp, "Id", &id);
        }
        if !doc.has_attr(comp, "Guid") {
            let id = doc.id_of(comp).unwrap_or_default().to_string();
            let guid = ctx.guids.next_guid(&id).to_string();
            doc.set_attr(comp, "Guid", &guid);
        }
    }

    for (kind, name_attrs) in [
        (NodeKind::Feature, &["Title", "Name"][..]),
        (NodeKind::Shortcut, &["Name"][..]),
    ] {
        for node in doc.descendants_of_kind(product, &kind) {
            if doc.has_attr(node, "Id") {
                continue;
            }
            let raw = name_attrs
                .iter()
                .find_map(|a| doc.attr(node, a))
                .unwrap_or_default()
                .to_string();
            let id = ctx.ids.allocate(&kind, &raw);
            doc.set_attr(node, "Id", &id);
        }
    }
}

/// `ProgramFilesFolder\My Company\My Product` for the innermost directory of
/// that chain. `TARGETDIR` is not part of the path.
fn directory_logical_path(doc: &Document, dir: NodeId) -> String {
    let mut names: Vec<&str> = Vec::new();
    for d in std::iter::once(dir).chain(doc.ancestors(dir)) {
        if !doc.is(d, &NodeKind::Directory) || doc.attr_is(d, "Id", TARGET_DIR_ID) {
            break;
        }
        names.push(doc.attr(d, "Name").or_else(|| doc.id_of(d)).unwrap_or_default());
    }
    names.reverse();
    names.join("\\")
}
