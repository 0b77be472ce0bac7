use keel_graph::{Component, ComponentType, Identity, ModuleKind, ResourceRef};

use super::*;
use crate::passes::fixture::Fixture;

struct Skipping;

impl Stage for Skipping {
    fn name(&self) -> &'static str {
        "skipping"
    }

    fn apply(&self, _graph: &mut AppGraph, _cx: &StageContext<'_>) -> Result<(), StageError> {
        Err(StageError::skip("nothing to do"))
    }
}

struct Failing;

impl Stage for Failing {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn apply(&self, _graph: &mut AppGraph, _cx: &StageContext<'_>) -> Result<(), StageError> {
        Err(StageError::Failed {
            module: Some("orders".to_string()),
            message: "boom".to_string(),
        })
    }
}

struct Marking(&'static str);

impl Stage for Marking {
    fn name(&self) -> &'static str {
        self.0
    }

    fn apply(&self, graph: &mut AppGraph, _cx: &StageContext<'_>) -> Result<(), StageError> {
        graph
            .properties
            .insert(self.0.to_string(), "ran".to_string());
        Ok(())
    }
}

#[test]
fn standard_pipeline_order() {
    let names: Vec<&str> = Pipeline::standard().stage_names().collect();
    assert_eq!(
        names,
        vec![
            "trusted-overrides",
            "generated-clients:add",
            "read-descriptors",
            "assign-identities",
            "discover-components",
            "generated-clients:prune",
            "disambiguate-shared-units",
            "application-properties",
            "module-properties",
            "component-properties",
            "init-deployments",
            "auto-link",
            "validate-resolution",
        ]
    );
}

#[test]
fn skipped_stage_warns_and_the_run_continues() {
    let mut pipeline = Pipeline::new();
    pipeline.push(Skipping);
    pipeline.push(Marking("after"));
    let mut graph = AppGraph::new();
    graph.identity = Some(Identity::from("shop"));

    let graph = pipeline.run(graph, &Fixture::new().cx()).unwrap();

    assert_eq!(graph.properties["after"], "ran");
    let warnings = graph.validation.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].key, "stage.skipped");
    assert_eq!(warnings[0].target, "shop");
    assert_eq!(warnings[0].detail, "skipping: nothing to do");
    assert!(graph.diagnostics().is_deployable());
}

#[test]
fn failing_stage_aborts_with_its_name_and_module() {
    let mut pipeline = Pipeline::new();
    pipeline.push(Failing);
    pipeline.push(Marking("after"));

    let err = pipeline
        .run(AppGraph::new(), &Fixture::new().cx())
        .unwrap_err();

    let DeployError::Stage { stage, module, .. } = &err else {
        panic!("expected a stage error, got {err:?}");
    };
    assert_eq!(*stage, "failing");
    assert_eq!(module.as_deref(), Some("orders"));
    assert_eq!(err.to_string(), "stage `failing` failed for orders");
}

#[test]
fn rule_violations_in_every_module_are_collected() {
    let mut graph = AppGraph::new();
    graph.identity = Some(Identity::from("shop"));
    for (module_name, component_name) in [("orders", "Orders"), ("billing", "Billing")] {
        let module = graph.add_module(ModuleKind::Container);
        module.identity = Some(Identity::from(module_name));
        let mut component = Component::new(
            component_name,
            format!("a.{component_name}"),
            ComponentType::Stateless,
        );
        component
            .refs
            .push(ResourceRef::new("jdbc/db").of_type("DataSource"));
        module.add_component(component).unwrap();
    }

    let graph = Pipeline::standard()
        .run(graph, &Fixture::offline().cx())
        .unwrap();

    let diagnostics = graph.diagnostics();
    assert!(!diagnostics.is_deployable());
    assert!(diagnostics.errors.is_empty());
    for target in ["Orders", "Billing"] {
        let keys: Vec<&str> = diagnostics
            .failures
            .iter()
            .filter(|d| d.target == target)
            .map(|d| d.key.as_str())
            .collect();
        assert_eq!(keys, vec!["link.unresolved", "link.unresolved"], "{target}");
    }
    for (_, module) in graph.modules_iter() {
        for component in module.components.values() {
            assert_eq!(component.deployment_id.as_deref(), Some(component.name.as_str()));
        }
    }
}
