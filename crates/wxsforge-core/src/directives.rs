//! Custom attribute directives.
//!
//! A directive asks for an attribute to be set on an element other than the
//! one that declared it (typically the enclosing `Component`). Directives are
//! typed instructions; the legacy `Parent:Key=Value` text form is accepted on
//! input and converted once, at deserialization time.

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::doc::{Document, NodeId, NodeKind};
use crate::error::BuildError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveTarget {
    /// The element carrying the directive.
    Own,
    /// The nearest enclosing `Component`.
    ParentComponent,
    /// Every `Custom` scheduling entry whose `Action` is the carrying `CustomAction`.
    CustomSchedule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DirectiveRepr")]
pub struct Directive {
    pub target: DirectiveTarget,
    pub key: String,
    pub value: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DirectiveRepr {
    Text(String),
    Typed {
        target: DirectiveTarget,
        key: String,
        value: String,
    },
}

impl TryFrom<DirectiveRepr> for Directive {
    type Error = String;

    fn try_from(repr: DirectiveRepr) -> Result<Self, String> {
        match repr {
            DirectiveRepr::Text(text) => Directive::parse(&text),
            DirectiveRepr::Typed { target, key, value } => Ok(Directive { target, key, value }),
        }
    }
}

impl Directive {
    pub fn new(target: DirectiveTarget, key: impl Into<String>, value: impl Into<String>) -> Self {
        Directive {
            target,
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parses `Component:Key=Value`, `Custom:Key=Value`, `{alias}Key=Value`
    /// or a bare `Key=Value`.
    pub fn parse(item: &str) -> Result<Directive, String> {
        let item = item.trim();
        if item.contains(":{http:") || item.contains(":{https:") {
            return Err(format!(
                "directive {item:?} uses a namespace URI; use `parent:{{alias}}attribute=value` with a declared alias"
            ));
        }
        let (name_spec, value) = item
            .split_once('=')
            .ok_or_else(|| format!("directive {item:?} is missing '='"))?;
        if name_spec.is_empty() {
            return Err(format!("directive {item:?} has an empty attribute name"));
        }

        let (target, key) = if name_spec.starts_with('{') {
            (DirectiveTarget::Own, name_spec)
        } else {
            match name_spec.split_once(':') {
                Some(("Component", key)) => (DirectiveTarget::ParentComponent, key),
                Some(("Custom", key)) => (DirectiveTarget::CustomSchedule, key),
                Some((parent, _)) => {
                    return Err(format!(
                        "directive {item:?} names unsupported parent element {parent:?}"
                    ))
                }
                None => (DirectiveTarget::Own, name_spec),
            }
        };
        if key.is_empty() {
            return Err(format!("directive {item:?} has an empty attribute name"));
        }

        Ok(Directive::new(target, key, value))
    }

    /// Text form used in error messages.
    pub fn describe(&self) -> String {
        match self.target {
            DirectiveTarget::Own => format!("{}={}", self.key, self.value),
            DirectiveTarget::ParentComponent => format!("Component:{}={}", self.key, self.value),
            DirectiveTarget::CustomSchedule => format!("Custom:{}={}", self.key, self.value),
        }
    }
}

/// Resolves the elements a directive declared on `source` applies to.
/// An empty result means the directive cannot be honored.
pub fn resolve_directive_target(
    doc: &Document,
    source: NodeId,
    directive: &Directive,
) -> Vec<NodeId> {
    match directive.target {
        DirectiveTarget::Own => vec![source],
        DirectiveTarget::ParentComponent => doc
            .ancestor_of_kind(source, &NodeKind::Component)
            .into_iter()
            .collect(),
        DirectiveTarget::CustomSchedule => {
            if !doc.is(source, &NodeKind::CustomAction) {
                return Vec::new();
            }
            let Some(action_id) = doc.id_of(source) else {
                return Vec::new();
            };
            doc.find_all(&NodeKind::Custom)
                .into_iter()
                .filter(|c| doc.attr_is(*c, "Action", action_id))
                .collect()
        }
    }
}

/// Applies and clears every directive in the tree, in document order.
/// Returns the number of directives applied.
pub fn expand_directives(doc: &mut Document) -> Result<usize, BuildError> {
    let mut applied = 0;
    let mut carriers: Vec<NodeId> = vec![doc.root()];
    carriers.extend(doc.descendants(doc.root()));
    carriers.retain(|n| !doc.node(*n).directives.is_empty());

    for source in carriers {
        let directives = std::mem::take(&mut doc.node_mut(source).directives);
        for directive in &directives {
            apply_directive(doc, source, directive)?;
            applied += 1;
        }
    }
    Ok(applied)
}

fn apply_directive(doc: &mut Document, source: NodeId, directive: &Directive) -> Result<(), BuildError> {
    let targets = resolve_directive_target(doc, source, directive);
    if targets.is_empty() {
        let reason = match directive.target {
            DirectiveTarget::ParentComponent => format!(
                "{} is not contained by a Component (some elements, e.g. CloseApplication, never are)",
                doc.path_of(source)
            ),
            DirectiveTarget::CustomSchedule => format!(
                "no Custom entry schedules {}",
                doc.path_of(source)
            ),
            DirectiveTarget::Own => "no target element".to_string(),
        };
        return Err(BuildError::UnresolvedDirective {
            directive: directive.describe(),
            reason,
        });
    }

    for target in targets {
        if directive.target == DirectiveTarget::ParentComponent {
            match directive.key.as_str() {
                "element_Condition" => {
                    let body = decode_condition(&directive.value).map_err(|reason| {
                        BuildError::InvalidDirective {
                            directive: directive.describe(),
                            reason,
                        }
                    })?;
                    let cond = doc.append(target, NodeKind::Condition);
                    doc.node_mut(cond).text = Some(body);
                    continue;
                }
                "Id" => {
                    if let Some(old) = doc.id_of(target).map(str::to_string) {
                        for r in doc.find_all(&NodeKind::ComponentRef) {
                            if doc.attr_is(r, "Id", &old) {
                                doc.set_attr(r, "Id", &directive.value);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        doc.set_attr(target, &directive.key, &directive.value);
    }
    Ok(())
}

fn decode_condition(value: &str) -> Result<String, String> {
    let Some(encoded) = value.strip_prefix("base64_") else {
        return Ok(value.to_string());
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| format!("invalid base64 condition body: {e}"))?;
    String::from_utf8(bytes).map_err(|e| format!("condition body is not UTF-8: {e}"))
}
