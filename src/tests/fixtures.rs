//! Shared bloks and helpers

use std::sync::Arc;

use crate::compose::{compose, CompositionError, EntitySet};
use crate::config::RegistryConfig;
use crate::core::{
    Blok, BlokError, BlokManager, BlokMetadata, ClassBody, DeclarationError, DeclarationRegistry, FieldDescriptor,
    FnBlok, RelationshipDescriptor,
};
use crate::lifecycle::{AccessError, LifecycleController};
use crate::schema::MemoryBackend;

/// Blok built from a declare closure
pub fn blok<F>(name: &str, dependencies: &[&str], declare: F) -> FnBlok
where
    F: Fn(&mut DeclarationRegistry) -> Result<(), DeclarationError> + Send + Sync + 'static,
{
    let mut metadata = BlokMetadata::new(name, "1.0.0");
    for dependency in dependencies {
        metadata = metadata.depends_on(*dependency);
    }
    FnBlok::new(metadata, declare)
}

pub fn catalog(bloks: Vec<FnBlok>) -> BlokManager {
    let catalog = BlokManager::new();
    for blok in bloks {
        catalog.register(Arc::new(blok)).unwrap();
    }
    catalog
}

/// Controller over a fresh in-memory backend
pub fn controller(catalog: &BlokManager, config: RegistryConfig) -> (LifecycleController, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new("test"));
    let controller = LifecycleController::new("test", backend.clone(), catalog.clone(), config);
    (controller, backend)
}

/// Second controller on the same backend, as a new process run would see it
pub fn reattach(backend: &Arc<MemoryBackend>, catalog: &BlokManager, config: RegistryConfig) -> LifecycleController {
    LifecycleController::new("test", backend.clone(), catalog.clone(), config)
}

/// Compose bloks declared in order, without any backend
pub fn compose_bloks(bloks: &[FnBlok]) -> Result<EntitySet, CompositionError> {
    let mut registry = DeclarationRegistry::new();
    let mut names = Vec::new();
    for blok in bloks {
        let name = blok.metadata().name.clone();
        registry.init_blok(&name).unwrap();
        blok.declare(&mut registry).unwrap();
        names.push(name);
    }
    compose(&registry.freeze(), &names)
}

pub fn address_body() -> ClassBody {
    ClassBody::new()
        .field(FieldDescriptor::integer("id").primary_key())
        .field(FieldDescriptor::string("street"))
        .field(FieldDescriptor::string("city"))
}

pub fn person_body() -> ClassBody {
    ClassBody::new()
        .field(FieldDescriptor::integer("id").primary_key())
        .field(FieldDescriptor::string("name").required())
        .field(FieldDescriptor::integer("address_id").foreign_key("Model.Address", "id"))
}

/// `address` blok: Address with a One2Many `persons` paired with `Person.address`
pub fn address_blok() -> FnBlok {
    blok("address", &[], |r| {
        r.declare("Model", "Model.Address", address_body())?;
        r.declare("Model", "Model.Person", person_body())?;
        r.declare(
            "Model",
            "Model.Address",
            ClassBody::new().relationship(RelationshipDescriptor::one2many("persons", "Model.Person").inverse("address")),
        )?;
        Ok(())
    })
}

/// Turn an access failure into a hook failure
pub fn hook_error(blok: &str) -> impl Fn(AccessError) -> BlokError + '_ {
    move |err| BlokError::Hook {
        blok: blok.to_string(),
        reason: err.to_string(),
    }
}
