//! Speculative client views of component containers.
//!
//! A container module that exposes remote interfaces or an entry point, or ships a client
//! descriptor, may be called from a client bundle. The promoter adds a generated client view
//! for it before descriptors are read; once discovery has filled in the view's client surface
//! the pruner drops the views that turned out to have nothing to offer.

use keel_graph::{AppGraph, ClassIndex, ClientView, ModuleId, ModuleKind, ScanSlot, markers};
use keel_scanner::DescriptorName;

use super::{Stage, StageContext, StageError, descriptors};

fn has_client_surface(index: &ClassIndex) -> bool {
    index.has_marker(markers::REMOTE) || index.classes().any(|class| class.has_main)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AddGeneratedClients;

impl Stage for AddGeneratedClients {
    fn name(&self) -> &'static str {
        "generated-clients:add"
    }

    fn apply(&self, graph: &mut AppGraph, cx: &StageContext<'_>) -> Result<(), StageError> {
        let viewed: Vec<ModuleId> = graph
            .modules_iter()
            .filter_map(|(_, m)| m.client.as_ref().map(|view| view.source))
            .collect();

        let mut sources = Vec::new();
        for (id, module) in graph.modules_iter() {
            if module.kind != ModuleKind::Container || module.generated || viewed.contains(&id) {
                continue;
            }
            if graph.scan_for(id).is_some_and(has_client_surface)
                || descriptors::read(graph, id, module, DescriptorName::Client, cx)?.is_some()
            {
                sources.push(id);
            }
        }

        for source in sources {
            let (location, loader) = {
                let module = graph.module(source);
                (module.location.clone(), module.loader)
            };
            let view = graph.add_module(ModuleKind::Client);
            view.generated = true;
            view.location = location;
            view.loader = loader;
            view.scan = ScanSlot::Shared(source);
            view.client = Some(ClientView::new(source));
            tracing::debug!(%source, view = %view.id, "added generated client view");
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PruneGeneratedClients;

impl Stage for PruneGeneratedClients {
    fn name(&self) -> &'static str {
        "generated-clients:prune"
    }

    fn apply(&self, graph: &mut AppGraph, _cx: &StageContext<'_>) -> Result<(), StageError> {
        let mut empty = Vec::new();
        for (id, module) in graph.modules_iter_mut() {
            if !module.generated {
                continue;
            }
            let Some(view) = &module.client else {
                continue;
            };
            if view.remote_interfaces.is_empty()
                && view.main_class.is_none()
                && module.descriptors.client.is_none()
            {
                empty.push(id);
            } else {
                module.descriptors.client.get_or_insert_default();
            }
        }
        for id in empty {
            if let Some(module) = graph.remove_module(id) {
                tracing::debug!(view = %module.display_name(), "pruned empty client view");
            }
        }
        Ok(())
    }
}
