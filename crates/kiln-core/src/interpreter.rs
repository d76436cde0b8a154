//! The definition interpreter: top-level driver of an installation run.
//!
//! Configuration problems (unknown strategies) are reported by
//! [`Interpreter::prepare`] before any workspace exists. Everything after
//! that runs inside one [`Transaction`]:
//!
//! 1. before hooks
//! 2. for each package, in order: predicate, fetch, build
//! 3. after hooks, which see the exit status
//!
//! The first error stops the run; later packages are never attempted.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_schema::{Definition, PackageSpec};

use crate::builder::{self, BuildContext, Builder};
use crate::error::InstallError;
use crate::fetch::{Fetcher, ToolClient};
use crate::hooks::{CommandDiscovery, DirectoryDiscovery, HookContext, HookDiscovery, HookError, HookRegistry, Phase};
use crate::options::BuildOptions;
use crate::reporter::Reporter;
use crate::settings::Settings;
use crate::strategies::StrategyRegistry;
use crate::transaction::{InstallContext, Outcome, Transaction};

/// Drives definitions through fetch, build and install.
pub struct Interpreter {
    settings: Settings,
    strategies: StrategyRegistry,
    hooks: HookRegistry,
    fetcher: Fetcher,
    reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("strategies", &self.strategies.names())
            .field("hooks", &self.hooks)
            .field("fetcher", &self.fetcher)
            .finish_non_exhaustive()
    }
}

impl Interpreter {
    /// Interpreter with the built-in strategies, no hooks, and the HTTP
    /// client found on `PATH`.
    pub fn new(settings: Settings, reporter: Arc<dyn Reporter>) -> Self {
        let http = ToolClient::detect_shared(settings.http_client.as_deref());
        if http.is_none() {
            tracing::debug!("no HTTP client available; tarball downloads will fail");
        }
        let fetcher = Fetcher::new(http, settings.mirror_url.clone());
        Self {
            settings,
            strategies: StrategyRegistry::builtin(),
            hooks: HookRegistry::new(),
            fetcher,
            reporter,
        }
    }

    /// Replace the fetcher, e.g. to inject a transport.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Fetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Replace the strategy registry.
    #[must_use]
    pub fn with_strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = strategies;
        self
    }

    /// Settings the interpreter was created with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Registry for Rust plugins to add hooks to.
    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    /// Discover hook scripts from the configured hook directories and the
    /// discovery command, and register them.
    ///
    /// # Errors
    ///
    /// Returns a `HookError` if discovery fails.
    pub fn load_hooks(&mut self) -> Result<usize, HookError> {
        let dirs = DirectoryDiscovery::new(self.settings.hook_path.clone());
        let command = self.settings.hook_command.clone().map(CommandDiscovery::new);

        let mut sources: Vec<&dyn HookDiscovery> = vec![&dirs];
        if let Some(command) = &command {
            sources.push(command);
        }
        let count = self.hooks.load(&sources)?;
        if count > 0 {
            tracing::debug!("registered {count} hook scripts");
        }
        Ok(count)
    }

    /// Validate `definition` and open the transaction for installing it as
    /// `version_name` into `prefix`.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::UnknownStrategy` before touching the filesystem,
    /// or `InstallError::Workspace` if the workspace cannot be created.
    pub fn prepare(
        &self,
        definition: &Definition,
        version_name: &str,
        prefix: &Path,
    ) -> Result<Transaction, InstallError> {
        for package in &definition.packages {
            self.strategies.validate(package)?;
        }
        let ctx = InstallContext::new(&self.settings, version_name, prefix);
        Transaction::initialize(ctx, self.settings.cache_path.as_deref())
    }

    /// Run `definition` inside `tx`. The transaction is always resolved.
    pub fn run(&self, definition: &Definition, tx: Transaction) -> Outcome {
        tx.run(|tx| {
            let mut hook_ctx = HookContext::new(
                tx.context().version_name.clone(),
                tx.context().prefix_path.clone(),
            );
            hook_ctx.definition.clone_from(&definition.path);

            let result = self.run_packages(definition, tx, &mut hook_ctx);

            hook_ctx.status = Some(if result.is_ok() { 0 } else { 1 });
            let after = self.hooks.run_all(Phase::After, &mut hook_ctx, tx.log());
            match (result, after) {
                (Ok(()), after) => after.map_err(InstallError::from),
                (Err(e), Ok(())) => Err(e),
                (Err(e), Err(hook_err)) => {
                    tx.log().line(format!("after hook failed: {hook_err}"));
                    tracing::warn!("after hook failed: {hook_err}");
                    Err(e)
                }
            }
        })
    }

    /// [`Interpreter::prepare`] then [`Interpreter::run`].
    ///
    /// # Errors
    ///
    /// Returns configuration errors only; everything later is reported in
    /// the `Outcome`.
    pub fn install(
        &self,
        definition: &Definition,
        version_name: &str,
        prefix: &Path,
    ) -> Result<Outcome, InstallError> {
        let tx = self.prepare(definition, version_name, prefix)?;
        Ok(self.run(definition, tx))
    }

    fn run_packages(
        &self,
        definition: &Definition,
        tx: &mut Transaction,
        hook_ctx: &mut HookContext,
    ) -> Result<(), InstallError> {
        self.hooks.run_all(Phase::Before, hook_ctx, tx.log())?;
        if hook_ctx.version_name != tx.context().version_name || hook_ctx.prefix != tx.context().prefix_path {
            tx.retarget(hook_ctx.version_name.clone(), hook_ctx.prefix.clone());
        }

        let prefix = tx.context().prefix_path.clone();
        fs::create_dir_all(&prefix)?;

        for package in &definition.packages {
            if let Some(installed_to) = self.install_package(package, tx, &prefix, hook_ctx)? {
                tx.record_prefix(installed_to);
            }
        }
        Ok(())
    }

    /// Install one package. Returns where it installed, or `None` when its
    /// predicate skipped it.
    fn install_package(
        &self,
        package: &PackageSpec,
        tx: &Transaction,
        prefix: &Path,
        hook_ctx: &HookContext,
    ) -> Result<Option<PathBuf>, InstallError> {
        let log = tx.log();
        if let Some(predicate) = &package.only_if {
            if !builder::shell_predicate(predicate, None, log) {
                let reason = format!("`{predicate}` failed");
                log.line(format!("skipping {}: {reason}", package.name));
                self.reporter.skipped(&package.name, &reason);
                return Ok(None);
            }
        }

        self.reporter.downloading(&package.name, &package.locator.primary());
        let tree = self
            .fetcher
            .fetch(package, &tx.context().build_path, tx.cache(), log)?;

        self.reporter.installing(&package.name);
        let options = BuildOptions::resolve(&package.name, &self.settings)
            .with_definition_args(&package.configure_args);
        let mut ctx = BuildContext {
            package,
            source: &tree.root,
            prefix,
            options,
            make: &self.settings.make,
            env: &hook_ctx.env,
            log,
        };
        Builder::new(&self.strategies).build(&mut ctx)?;

        let installed_to = ctx.install_prefix().to_path_buf();
        self.reporter.installed(&package.name, &installed_to);
        Ok(Some(installed_to))
    }
}
