use serde_json::{json, Value};

use wxsforge_core::diagnostics::Rule;
use wxsforge_core::doc::{parse_document_json, Document, NodeId, NodeKind};
use wxsforge_core::options::{parse_config, OutputType};
use wxsforge_core::{build_document, BuildContext, BuildError, BuildOptions, BuildOutput};

fn document(root: Value) -> Document {
    let file = json!({ "schema_version": "wxsforge.document@0.1.0", "root": root });
    parse_document_json(file.to_string().as_bytes()).expect("parse document")
}

fn build(root: Value) -> BuildOutput {
    build_with(root, &BuildOptions::default())
}

fn build_with(root: Value, opts: &BuildOptions) -> BuildOutput {
    let mut ctx = BuildContext::new(&opts.guid);
    build_document(document(root), &mut ctx, opts).expect("build")
}

fn find_by_id(doc: &Document, kind: NodeKind, id: &str) -> NodeId {
    doc.find_all(&kind)
        .into_iter()
        .find(|n| doc.attr_is(*n, "Id", id))
        .unwrap_or_else(|| panic!("no {kind} with Id {id}"))
}

fn product(children: Value) -> Value {
    json!({
        "kind": "Product",
        "attributes": { "Name": "Acme App", "Version": "1.0.0" },
        "children": children,
    })
}

fn target_dir(children: Value) -> Value {
    json!({
        "kind": "Directory",
        "attributes": { "Id": "TARGETDIR", "Name": "SourceDir" },
        "children": children,
    })
}

#[test]
fn empty_directory_gets_create_and_remove_folder_and_parent_chain() {
    let out = build(product(json!([
        { "kind": "Package", "attributes": { "InstallerVersion": "200" } },
        target_dir(json!([{
            "kind": "Directory",
            "attributes": { "Id": "ProgramFilesFolder", "Name": "ProgramFilesFolder" },
            "children": [{
                "kind": "Directory",
                "attributes": { "Name": "Acme" },
                "children": [{
                    "kind": "Directory",
                    "attributes": { "Name": "Logs" },
                    "children": [{ "kind": "Component", "attributes": { "Id": "Logs.EmptyDirectory" } }],
                }],
            }],
        }])),
    ])));
    let doc = &out.document;

    let logs = find_by_id(doc, NodeKind::Component, "Logs.EmptyDirectory");
    assert!(doc.attr_is(logs, "KeyPath", "yes"));
    assert!(doc.first_child_of_kind(logs, &NodeKind::CreateFolder).is_some());
    let rf = doc.first_child_of_kind(logs, &NodeKind::RemoveFolder).unwrap();
    assert!(doc.attr_is(rf, "Id", "ProgramFilesFolder.Acme.Logs"));
    assert!(doc.attr_is(rf, "On", "uninstall"));

    let chain = find_by_id(doc, NodeKind::Component, "ProgramFilesFolder.Acme");
    assert!(doc.attr(chain, "Guid").is_some());
    assert!(doc.first_child_of_kind(chain, &NodeKind::RemoveFolder).is_some());

    // the protected root never gets a component
    let pf = find_by_id(doc, NodeKind::Directory, "ProgramFilesFolder");
    assert!(doc.first_child_of_kind(pf, &NodeKind::Component).is_none());

    let feature = find_by_id(doc, NodeKind::Feature, "Complete");
    let refs: Vec<&str> = doc
        .children_of_kind(feature, &NodeKind::ComponentRef)
        .into_iter()
        .filter_map(|r| doc.id_of(r))
        .collect();
    assert!(refs.contains(&"Logs.EmptyDirectory"));
    assert!(refs.contains(&"ProgramFilesFolder.Acme"));

    assert_eq!(out.report.insertions.count(Rule::CreateFolder), 2);
    assert!(out.report.ok);
}

#[test]
fn user_profile_components_get_registry_key_path() {
    let out = build(product(json!([
        target_dir(json!([{
            "kind": "Directory",
            "attributes": { "Id": "AppDataFolder", "Name": "AppDataFolder" },
            "children": [{
                "kind": "Directory",
                "attributes": { "Name": "Acme" },
                "children": [{
                    "kind": "Component",
                    "children": [{ "kind": "File", "attributes": { "Source": "files/app.cfg" } }],
                }],
            }],
        }])),
    ])));
    let doc = &out.document;

    let comp = find_by_id(doc, NodeKind::Component, "Component.app.cfg");
    let key = doc.first_child_of_kind(comp, &NodeKind::RegistryKey).unwrap();
    assert!(doc.attr_is(key, "Root", "HKCU"));
    assert!(doc.attr_is(key, "Key", r"Software\WxsForge\Used"));
    let value = doc.first_child_of_kind(key, &NodeKind::RegistryValue).unwrap();
    assert!(doc.attr_is(value, "KeyPath", "yes"));

    let rf = doc.first_child_of_kind(comp, &NodeKind::RemoveFolder).unwrap();
    assert!(doc.attr_is(rf, "Id", "AppDataFolder.Acme"));

    // the profile folder itself is never removed
    let appdata = find_by_id(doc, NodeKind::Directory, "AppDataFolder");
    assert!(doc.first_child_of_kind(appdata, &NodeKind::Component).is_none());
}

#[test]
fn shortcuts_sharing_an_icon_file_share_one_icon() {
    let shortcut = |name: &str| {
        json!({ "kind": "Shortcut", "attributes": { "Name": name, "Icon": r"res\app.ico" } })
    };
    let out = build(product(json!([
        target_dir(json!([{
            "kind": "Directory",
            "install_dir": true,
            "attributes": { "Name": "Acme" },
            "children": [{
                "kind": "Component",
                "children": [{
                    "kind": "File",
                    "attributes": { "Source": "app.exe" },
                    "children": [shortcut("Acme"), shortcut("Acme Tools")],
                }],
            }],
        }])),
    ])));
    let doc = &out.document;

    let icons = doc.find_all(&NodeKind::Icon);
    assert_eq!(icons.len(), 1);
    assert!(doc.attr_is(icons[0], "Id", "IconFile1_app.ico"));
    assert!(doc.attr_is(icons[0], "SourceFile", r"res\app.ico"));
    for s in doc.find_all(&NodeKind::Shortcut) {
        assert!(doc.attr_is(s, "Icon", "IconFile1_app.ico"));
    }
    assert_eq!(out.report.insertions.count(Rule::ShortcutIcon), 1);
}

#[test]
fn x64_packages_mark_components_and_host_orphans() {
    let out = build(product(json!([
        { "kind": "Package", "attributes": { "Platform": "x64" } },
        { "kind": "Component", "attributes": { "Id": "Loose" } },
    ])));
    let doc = &out.document;

    let comp = find_by_id(doc, NodeKind::Component, "Loose");
    assert!(doc.attr_is(comp, "Win64", "yes"));
    let host = doc.parent(comp).unwrap();
    assert!(doc.attr_is(host, "Id", "ProgramFiles64Folder"));
}

#[test]
fn absolute_install_root_is_set_through_custom_actions() {
    let out = build(product(json!([
        target_dir(json!([{
            "kind": "Directory",
            "attributes": { "Name": r"C:\Tools" },
            "children": [{ "kind": "Component" }],
        }])),
    ])));
    let doc = &out.document;

    let prop = find_by_id(doc, NodeKind::Property, "INSTALLDIR_ABSOLUTEPATH");
    assert!(doc.attr_is(prop, "Value", r"C:\Tools"));
    let action = find_by_id(doc, NodeKind::CustomAction, "Set_DirAbsolutePath");
    assert!(doc.attr_is(action, "Property", "Tools"));
    let dir = find_by_id(doc, NodeKind::Directory, "Tools");
    assert!(doc.attr_is(dir, "Name", "ABSOLUTEPATH"));

    let customs = doc.find_all(&NodeKind::Custom);
    assert_eq!(customs.len(), 2);
    assert!(out.wxs.contains("(NOT Installed) AND (UILevel &lt; 5) AND (Tools = ABSOLUTEPATH)"));
}

#[test]
fn directives_update_the_enclosing_component() {
    let out = build(product(json!([
        target_dir(json!([{
            "kind": "Directory",
            "attributes": { "Id": "INSTALLDIR", "Name": "Acme" },
            "children": [{
                "kind": "Component",
                "attributes": { "Id": "Main" },
                "children": [{
                    "kind": "File",
                    "attributes": { "Source": "app.exe" },
                    "directives": [
                        "Component:NeverOverwrite=yes",
                        { "target": "parent_component", "key": "element_Condition", "value": "base64_VklQID0gMQ==" },
                    ],
                }],
            }],
        }])),
    ])));
    let doc = &out.document;

    let comp = find_by_id(doc, NodeKind::Component, "Main");
    assert!(doc.attr_is(comp, "NeverOverwrite", "yes"));
    let cond = doc.first_child_of_kind(comp, &NodeKind::Condition).unwrap();
    assert_eq!(doc.node(cond).text.as_deref(), Some("VIP = 1"));
    assert_eq!(out.report.insertions.count(Rule::Directive), 1);
}

#[test]
fn directive_outside_a_component_is_an_error() {
    let doc = document(product(json!([{
        "kind": "Property",
        "attributes": { "Id": "P", "Value": "1" },
        "directives": ["Component:Permanent=yes"],
    }])));
    let err = build_document(doc, &mut BuildContext::default(), &BuildOptions::default()).unwrap_err();
    assert!(matches!(err, BuildError::UnresolvedDirective { .. }), "{err}");
}

#[test]
fn precheck_failures_surface_as_typed_errors() {
    let no_product = document(json!({ "kind": "Wix" }));
    let err = build_document(no_product, &mut BuildContext::default(), &BuildOptions::default())
        .unwrap_err();
    assert!(matches!(err, BuildError::MissingProduct));

    let two_install_dirs = document(product(json!([target_dir(json!([
        { "kind": "Directory", "install_dir": true, "attributes": { "Name": "A" } },
        { "kind": "Directory", "install_dir": true, "attributes": { "Name": "B" } },
    ]))])));
    let err = build_document(two_install_dirs, &mut BuildContext::default(), &BuildOptions::default())
        .unwrap_err();
    assert!(matches!(err, BuildError::MultipleInstallDirs(ref dirs) if dirs.len() == 2));

    let bad_token = document(product(json!([target_dir(json!([
        { "kind": "Directory", "attributes": { "Name": "%NoSuchFolder%" } },
    ]))])));
    let err = build_document(bad_token, &mut BuildContext::default(), &BuildOptions::default())
        .unwrap_err();
    assert!(matches!(err, BuildError::UnknownEnvironmentConstant { .. }));
}

fn sample_product() -> Value {
    product(json!([
        { "kind": "Package", "attributes": { "InstallerVersion": "200" } },
        target_dir(json!([{
            "kind": "Directory",
            "attributes": { "Name": "%ProgramFiles%" },
            "children": [{
                "kind": "Directory",
                "install_dir": true,
                "attributes": { "Name": "Acme" },
                "children": [
                    { "kind": "Component", "children": [{ "kind": "File", "attributes": { "Source": "app.exe" } }] },
                    { "kind": "Component", "children": [{ "kind": "File", "attributes": { "Source": "readme.txt" } }] },
                    { "kind": "Directory", "attributes": { "Name": "Data" }, "children": [{ "kind": "Component" }] },
                ],
            }],
        }])),
        { "kind": "Feature", "attributes": { "Title": "Main", "Level": "1" } },
    ]))
}

#[test]
fn independent_builds_are_byte_identical() {
    let a = build(sample_product());
    let b = build(sample_product());
    assert_eq!(a.wxs, b.wxs);
    assert_eq!(a.report.meta["wxs_sha256"], b.report.meta["wxs_sha256"]);
}

#[test]
fn a_reused_context_builds_the_same_output_without_warnings() {
    let opts = BuildOptions::default();
    let mut ctx = BuildContext::new(&opts.guid);
    let first = build_document(document(sample_product()), &mut ctx, &opts).unwrap();
    let second = build_document(document(sample_product()), &mut ctx, &opts).unwrap();
    assert_eq!(first.wxs, second.wxs);
    assert!(second.report.diagnostics.iter().all(|d| d.code != "WXS0002"));
}

#[test]
fn early_allocation_is_reported_as_a_warning() {
    let opts = BuildOptions::default();
    let mut ctx = BuildContext::new(&opts.guid);
    ctx.ids.allocate(&NodeKind::File, "early.txt");
    let out = build_document(document(sample_product()), &mut ctx, &opts).unwrap();
    let warning = out.report.diagnostics.iter().find(|d| d.code == "WXS0002").unwrap();
    assert_eq!(serde_json::to_value(warning.severity).unwrap(), "warning");
    assert!(out.report.ok);
}

#[test]
fn sample_ids_follow_names_and_paths() {
    let out = build(sample_product());
    let doc = &out.document;
    let install = find_by_id(doc, NodeKind::Directory, "INSTALLDIR");
    assert!(doc.attr_is(install, "Name", "Acme"));
    find_by_id(doc, NodeKind::Directory, "ProgramFilesFolder");
    find_by_id(doc, NodeKind::Directory, "ProgramFilesFolder.Acme.Data");
    find_by_id(doc, NodeKind::Component, "Component.app.exe");
    find_by_id(doc, NodeKind::Component, "Component.readme.txt");
    find_by_id(doc, NodeKind::Feature, "Main");
    assert!(doc.find_all(&NodeKind::Feature).len() == 1);
}

#[test]
fn merge_module_output_drops_features() {
    let opts = BuildOptions {
        output: wxsforge_core::options::OutputOptions {
            output_type: OutputType::Msm,
            ..Default::default()
        },
        ..Default::default()
    };
    let out = build_with(sample_product(), &opts);
    let doc = &out.document;
    assert!(doc.find_all(&NodeKind::Product).is_empty());
    assert_eq!(doc.find_all(&NodeKind::Module).len(), 1);
    assert!(doc.find_all(&NodeKind::Feature).is_empty());
    assert!(out.wxs.contains("<Module "));
}

#[test]
fn sequential_guid_mode_from_config() {
    let opts = parse_config(
        br#"{
            "schema_version": "wxsforge.config@0.1.0",
            "guid": { "mode": "sequential", "base": "00000000-0000-0000-0000-000000000000" }
        }"#,
    )
    .unwrap();
    let out = build_with(sample_product(), &opts);
    let doc = &out.document;
    let mut guids: Vec<String> = doc
        .find_all(&NodeKind::Component)
        .into_iter()
        .filter_map(|c| doc.attr(c, "Guid").map(str::to_string))
        .collect();
    guids.sort();
    assert_eq!(guids[0], "00000000-0000-0000-0000-000000000001");
    assert_eq!(guids[1], "00000000-0000-0000-0000-000000000002");
}

fn sequential_options() -> BuildOptions {
    parse_config(br#"{ "schema_version": "wxsforge.config@0.1.0", "guid": { "mode": "sequential" } }"#)
        .unwrap()
}

fn component_guids(out: &BuildOutput) -> Vec<String> {
    let doc = &out.document;
    doc.find_all(&NodeKind::Component)
        .into_iter()
        .filter_map(|c| doc.attr(c, "Guid").map(str::to_string))
        .collect()
}

fn with_upgrade_code(code: &str) -> Value {
    let mut root = sample_product();
    root["attributes"]["UpgradeCode"] = json!(code);
    root
}

#[test]
fn sequential_builds_on_a_reused_context_repeat_their_guids() {
    let opts = sequential_options();
    let mut ctx = BuildContext::new(&opts.guid);
    let first = build_document(document(sample_product()), &mut ctx, &opts).unwrap();
    let second = build_document(document(sample_product()), &mut ctx, &opts).unwrap();
    assert_eq!(component_guids(&first), component_guids(&second));
    assert_eq!(first.wxs, second.wxs);
}

#[test]
fn component_guids_are_seeded_by_the_upgrade_code() {
    let a = build(with_upgrade_code("11111111-1111-1111-1111-111111111111"));
    let b = build(with_upgrade_code("22222222-2222-2222-2222-222222222222"));
    let again = build(with_upgrade_code("11111111-1111-1111-1111-111111111111"));

    let guids_a = component_guids(&a);
    let guids_b = component_guids(&b);
    assert!(!guids_a.is_empty());
    assert!(guids_a.iter().all(|g| !guids_b.contains(g)));
    assert_eq!(guids_a, component_guids(&again));
}

#[test]
fn configured_guid_base_overrides_the_upgrade_code() {
    let opts = parse_config(
        br#"{
            "schema_version": "wxsforge.config@0.1.0",
            "guid": { "base": "6f330b47-2577-43ad-9095-1861ba25889b" }
        }"#,
    )
    .unwrap();
    let pinned = build_with(with_upgrade_code("11111111-1111-1111-1111-111111111111"), &opts);
    let plain = build(sample_product());
    assert_eq!(component_guids(&pinned), component_guids(&plain));
}

#[test]
fn a_failed_build_leaves_no_ids_behind() {
    let opts = BuildOptions::default();
    let mut ctx = BuildContext::new(&opts.guid);
    let failing = document(product(json!([
        target_dir(json!([{
            "kind": "Directory",
            "install_dir": true,
            "attributes": { "Name": "Acme" },
            "children": [{ "kind": "Component", "children": [{ "kind": "File", "attributes": { "Source": "app.exe" } }] }],
        }])),
        {
            "kind": "Property",
            "attributes": { "Id": "P", "Value": "1" },
            "directives": ["Component:Permanent=yes"],
        },
    ])));
    assert!(build_document(failing, &mut ctx, &opts).is_err());

    let out = build_document(document(sample_product()), &mut ctx, &opts).unwrap();
    assert!(out.report.diagnostics.iter().all(|d| d.code != "WXS0002"));
    assert_eq!(out.wxs, build(sample_product()).wxs);
}
