pub mod apply;
pub mod destroy;
pub mod plan;
pub mod state;
pub mod validate;

use anyhow::Result;
use declarative::{
    DeclarationStore, FileStateStore, ProviderRegistry, ReconcileOptions, Reconciler,
};
use std::path::PathBuf;

use crate::cli::TemplateArgs;
use crate::paths;
use crate::signal;
use crate::template::Template;

/// Everything a command needs, loaded from the template
pub struct Project {
    pub template_path: PathBuf,
    pub store: DeclarationStore,
    pub registry: ProviderRegistry,
    pub state: FileStateStore,
}

impl Project {
    pub fn load(args: &TemplateArgs) -> Result<Self> {
        let template_path = paths::template_path(args.template.as_deref());
        let template = Template::load(&template_path)?;
        let settings = template.settings(&args.vars, std::env::vars())?;
        let store = template.store(settings)?;
        let registry = template.registry(&paths::template_dir(&template_path));
        let state = state_store(args);
        log::info!(
            "Loaded {} declarations from {}",
            store.len(),
            template_path.display()
        );

        Ok(Self {
            template_path,
            store,
            registry,
            state,
        })
    }

    /// Reconciler over this project, cancelled by SIGINT/SIGTERM
    pub fn reconciler(&self, jobs: usize) -> Reconciler<'_> {
        let options = ReconcileOptions {
            jobs,
            ..ReconcileOptions::default()
        };
        Reconciler::new(&self.store, &self.registry, &self.state)
            .with_options(options)
            .with_cancel(signal::install())
    }
}

/// State store for the given arguments; the template is not read
pub fn state_store(args: &TemplateArgs) -> FileStateStore {
    let template_path = paths::template_path(args.template.as_deref());
    FileStateStore::new(paths::state_path(args.state.as_deref(), &template_path))
}
