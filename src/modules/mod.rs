pub mod books;

use shelf_events::EventBus;
use shelf_kernel::{settings::Settings, ModuleRegistry};

/// Register all project-specific modules with the registry
pub fn register_all(registry: &mut ModuleRegistry, settings: &Settings) -> anyhow::Result<()> {
    let events = EventBus::new();
    registry.register(books::create_module(settings, events)?)?;
    Ok(())
}
