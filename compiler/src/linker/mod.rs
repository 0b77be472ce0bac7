//! Auto-linking of unresolved resource references and component containers.

use keel_config::{PropertyMap, ScopeLevel, apply_overrides};
use keel_graph::{
    Component, ComponentType, DeclaredContainer, DeclaredResource, Origin, Provenance,
    ResolvedBinding, ResourceRef,
};

use crate::catalog::{ProviderCatalog, ProviderKind, ProviderTemplate};

/// Lookup prefixes stripped before matching a reference name against resource ids.
const LOOKUP_PREFIXES: [&str; 2] = ["comp/env/", "keel/Resource/"];

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LinkError {
    #[error(
        "no resource found for `{name}` of type `{}` in {owner} (looked for `{normalized}` and \
         `{short}`)",
        .ty.as_deref().unwrap_or("<untyped>")
    )]
    NotFound {
        owner: String,
        name: String,
        normalized: String,
        short: String,
        ty: Option<String>,
    },
    #[error(
        "`{name}` in {owner} matches {} candidates of type `{ty}`: {}",
        .candidates.len(),
        .candidates.join(", ")
    )]
    Ambiguous {
        owner: String,
        name: String,
        ty: String,
        candidates: Vec<String>,
    },
    #[error("no provider available for `{name}` of type `{ty}` in {owner}")]
    NoProvider {
        owner: String,
        name: String,
        ty: String,
    },
}

impl LinkError {
    /// Stable diagnostic key.
    pub fn key(&self) -> &'static str {
        match self {
            LinkError::NotFound { .. } => "link.unresolved",
            LinkError::Ambiguous { .. } => "link.ambiguous",
            LinkError::NoProvider { .. } => "link.no_provider",
        }
    }
}

/// What the linker may do besides binding to existing candidates.
#[derive(Clone, Copy, Debug)]
pub struct LinkPolicy<'a> {
    pub auto_create: bool,
    /// Flat property space searched for `"<created-id>."` overrides of template properties.
    pub overrides: &'a PropertyMap,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Linked {
    pub binding: ResolvedBinding,
    /// Created from a type default rather than a named provider; probably needs configuration.
    pub from_default: bool,
}

impl Linked {
    fn new(target: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            binding: ResolvedBinding {
                target: target.into(),
                provenance,
            },
            from_default: false,
        }
    }
}

/// Strip lookup prefixes: `java:comp/env/jdbc/orders` becomes `jdbc/orders`.
pub fn normalize(name: &str) -> &str {
    let mut name = name.strip_prefix("java:").unwrap_or(name);
    name = name.trim_start_matches('/');
    for prefix in LOOKUP_PREFIXES {
        if let Some(rest) = name.strip_prefix(prefix) {
            name = rest;
        }
    }
    name
}

pub fn short_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Resolve one resource reference held by `owner` against `candidates`.
///
/// A reference that already carries a binding gets it back unchanged. Resources created
/// from the catalog are appended to `candidates`, so later references reuse them.
pub fn resolve(
    reference: &ResourceRef,
    owner: &str,
    candidates: &mut Vec<DeclaredResource>,
    catalog: &dyn ProviderCatalog,
    policy: LinkPolicy<'_>,
) -> Result<Linked, LinkError> {
    if let Some(binding) = &reference.binding {
        return Ok(Linked {
            binding: binding.clone(),
            from_default: false,
        });
    }

    if let Some(target) = reference.explicit_target.as_deref()
        && candidates.iter().any(|c| c.id == target)
    {
        return Ok(Linked::new(target, Provenance::Explicit));
    }

    let lookup = reference
        .explicit_target
        .as_deref()
        .unwrap_or(&reference.name);
    let normalized = normalize(lookup);
    let short = short_name(normalized);
    let ty = reference.type_hint.as_deref();
    let compatible = |c: &DeclaredResource| ty.is_none_or(|ty| c.provides(ty));

    // A typed name match is tried first; the declared resource may also be a subtype
    // whose type string differs from the hint, so the names are retried untyped.
    let typed = [true, false].into_iter().filter(|&typed| typed || ty.is_some());
    for check_type in typed {
        for name in [normalized, short] {
            let mut named = candidates.iter().filter(|c| {
                (!check_type || compatible(*c)) && c.id.eq_ignore_ascii_case(name)
            });
            if let (Some(found), None) = (named.next(), named.next()) {
                return Ok(Linked::new(found.id.clone(), Provenance::ByName));
            }
        }
    }

    let by_type: Vec<&DeclaredResource> = match ty {
        Some(ty) => candidates.iter().filter(|c| c.provides(ty)).collect(),
        None => Vec::new(),
    };
    if let [only] = by_type.as_slice() {
        tracing::info!(
            %owner,
            reference = %reference.name,
            resource = %only.id,
            "auto-linking reference to the only resource of its type"
        );
        return Ok(Linked::new(only.id.clone(), Provenance::ByType));
    }

    let not_found = || LinkError::NotFound {
        owner: owner.to_string(),
        name: reference.name.clone(),
        normalized: normalized.to_string(),
        short: short.to_string(),
        ty: ty.map(str::to_string),
    };

    let named_provider = [normalized, short]
        .into_iter()
        .filter_map(|name| catalog.lookup(name))
        .find(|template| template.kind == ProviderKind::Resource);
    if let Some(template) = named_provider {
        if !policy.auto_create {
            return Err(not_found());
        }
        let id = instantiate(template, candidates, policy.overrides);
        tracing::info!(
            %owner,
            reference = %reference.name,
            resource = %id,
            "auto-creating resource from named provider"
        );
        return Ok(Linked::new(id, Provenance::AutoCreated));
    }

    if by_type.len() > 1 {
        return Err(LinkError::Ambiguous {
            owner: owner.to_string(),
            name: reference.name.clone(),
            ty: ty.unwrap_or_default().to_string(),
            candidates: by_type.iter().map(|c| c.id.clone()).collect(),
        });
    }
    if !policy.auto_create {
        return Err(not_found());
    }
    let Some(ty) = ty else {
        return Err(not_found());
    };
    let Some(template) = catalog.default_for(ProviderKind::Resource, ty) else {
        return Err(LinkError::NoProvider {
            owner: owner.to_string(),
            name: reference.name.clone(),
            ty: ty.to_string(),
        });
    };
    let id = instantiate(template, candidates, policy.overrides);
    tracing::warn!(
        %owner,
        reference = %reference.name,
        resource = %id,
        %ty,
        "auto-creating resource from the default provider; it likely needs configuration"
    );
    Ok(Linked {
        from_default: true,
        ..Linked::new(id, Provenance::AutoCreated)
    })
}

/// Register a resource built from `template` unless one with its id exists; returns the id.
fn instantiate(
    template: &ProviderTemplate,
    candidates: &mut Vec<DeclaredResource>,
    overrides: &PropertyMap,
) -> String {
    if candidates.iter().any(|c| c.id == template.id) {
        return template.id.clone();
    }
    let mut properties = template.properties.clone();
    apply_overrides(&template.id, ScopeLevel::Application, overrides, &mut properties);
    candidates.push(DeclaredResource {
        id: template.id.clone(),
        types: template.types.clone(),
        properties,
        origin: Origin::AutoCreated {
            template: template.id.clone(),
        },
    });
    template.id.clone()
}

fn serves(container: &DeclaredContainer, component: &Component) -> bool {
    if container.component_type != component.component_type {
        return false;
    }
    match (&component.listener_interface, &container.listener_interface) {
        (Some(wanted), Some(offered)) => wanted == offered,
        _ => true,
    }
}

/// Pick the container for `component`, creating one from the catalog if allowed.
///
/// A container id set by a descriptor must name a declared container or a container
/// provider. Otherwise containers are matched by component type, and for message-driven
/// components by listener interface.
pub fn link_container(
    component: &Component,
    owner: &str,
    containers: &mut Vec<DeclaredContainer>,
    catalog: &dyn ProviderCatalog,
    policy: LinkPolicy<'_>,
) -> Result<Linked, LinkError> {
    let ty = component.component_type;
    let not_found = |name: &str| LinkError::NotFound {
        owner: owner.to_string(),
        name: name.to_string(),
        normalized: name.to_string(),
        short: short_name(name).to_string(),
        ty: Some(ty.as_str().to_string()),
    };

    if let Some(wanted) = component.container_id.as_deref() {
        if containers.iter().any(|c| c.id == wanted) {
            return Ok(Linked::new(wanted, Provenance::Explicit));
        }
        let provider = catalog
            .lookup(wanted)
            .filter(|t| t.kind == ProviderKind::Container && t.component_type() == Some(ty));
        return match provider {
            Some(template) if policy.auto_create => {
                let id = instantiate_container(template, component, containers, policy.overrides);
                tracing::info!(%owner, container = %id, "auto-creating container from named provider");
                Ok(Linked::new(id, Provenance::AutoCreated))
            }
            _ => Err(not_found(wanted)),
        };
    }

    let serving: Vec<&DeclaredContainer> =
        containers.iter().filter(|c| serves(c, component)).collect();
    match serving.as_slice() {
        [only] => {
            tracing::info!(%owner, container = %only.id, "auto-linking component to container");
            return Ok(Linked::new(only.id.clone(), Provenance::ByType));
        }
        [] => {}
        many => {
            return Err(LinkError::Ambiguous {
                owner: owner.to_string(),
                name: component.name.clone(),
                ty: ty.as_str().to_string(),
                candidates: many.iter().map(|c| c.id.clone()).collect(),
            });
        }
    }

    if !policy.auto_create {
        return Err(not_found(&component.name));
    }
    let template = match (ty, component.listener_interface.as_deref()) {
        (ComponentType::MessageDriven, Some(listener)) => {
            catalog.default_for(ProviderKind::Container, listener)
        }
        _ => catalog.default_for(ProviderKind::Container, ty.as_str()),
    };
    let Some(template) = template.filter(|t| t.component_type() == Some(ty)) else {
        return Err(LinkError::NoProvider {
            owner: owner.to_string(),
            name: component.name.clone(),
            ty: ty.as_str().to_string(),
        });
    };
    let id = instantiate_container(template, component, containers, policy.overrides);
    tracing::info!(%owner, container = %id, %ty, "auto-creating container");
    Ok(Linked::new(id, Provenance::AutoCreated))
}

fn instantiate_container(
    template: &ProviderTemplate,
    component: &Component,
    containers: &mut Vec<DeclaredContainer>,
    overrides: &PropertyMap,
) -> String {
    if containers.iter().any(|c| c.id == template.id) {
        return template.id.clone();
    }
    let mut properties = template.properties.clone();
    apply_overrides(&template.id, ScopeLevel::Application, overrides, &mut properties);
    let listener_interface = match component.component_type {
        ComponentType::MessageDriven => component
            .listener_interface
            .clone()
            .or_else(|| template.listener_interfaces().next().map(str::to_string)),
        _ => None,
    };
    containers.push(DeclaredContainer {
        id: template.id.clone(),
        component_type: component.component_type,
        listener_interface,
        properties,
        origin: Origin::AutoCreated {
            template: template.id.clone(),
        },
    });
    template.id.clone()
}
