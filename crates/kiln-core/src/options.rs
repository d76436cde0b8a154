//! Per-package build option resolution.
//!
//! Options for a package are looked up under its family key (see
//! [`PackageName::family`]): `FOO_CONFIGURE_OPTS` applies to `foo-1.0` and
//! `foo-2.3` alike. Flat string forms come from the environment and are
//! split on whitespace; list forms come from the config file and are passed
//! through untouched. Global flags always precede family flags.

use std::path::PathBuf;

use kiln_schema::{ConditionalArg, PackageName};

use crate::settings::Settings;

/// Resolved, read-only build options for one package.
///
/// Strategies receive their own copy, so a strategy such as
/// `enable_shared` can append flags for the steps that follow it without
/// affecting other packages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Family key the options were resolved under.
    pub family: String,
    /// Configure command; `./configure` when unset.
    pub configure: Option<String>,
    /// Install prefix override.
    pub prefix: Option<PathBuf>,
    /// Arguments appended after `--prefix=...`.
    pub configure_opts: Vec<String>,
    /// Conditional configure arguments, evaluated when configure runs.
    pub conditional_args: Vec<ConditionalArg>,
    /// Arguments for the build `make` step.
    pub make_opts: Vec<String>,
    /// Arguments for `make install`, before the `install` target.
    pub make_install_opts: Vec<String>,
    /// `CFLAGS` for the configure step, when any is configured.
    pub cflags: Option<String>,
    /// Inherited `CPPFLAGS`.
    pub cppflags: Option<String>,
    /// Inherited `LDFLAGS`.
    pub ldflags: Option<String>,
    /// Inherited `PKG_CONFIG_PATH`.
    pub pkg_config_path: Option<String>,
    /// Inherited `PATH`.
    pub path: Option<String>,
}

fn split_flat(value: Option<&str>) -> impl Iterator<Item = String> + '_ {
    value
        .into_iter()
        .flat_map(str::split_whitespace)
        .map(str::to_string)
}

fn join_flags(parts: &[Option<&str>]) -> Option<String> {
    let present: Vec<&str> = parts.iter().flatten().copied().collect();
    if present.is_empty() {
        None
    } else {
        Some(present.join(" "))
    }
}

impl BuildOptions {
    /// Resolve the options for `name` from `settings`.
    pub fn resolve(name: &PackageName, settings: &Settings) -> Self {
        let family = name.family();
        let key = |suffix: &str| format!("{family}_{suffix}");
        let overrides = settings.packages.get(&family).cloned().unwrap_or_default();

        let mut configure_opts: Vec<String> = split_flat(settings.var("CONFIGURE_OPTS")).collect();
        configure_opts.extend(split_flat(settings.var(&key("CONFIGURE_OPTS"))));
        configure_opts.extend(overrides.configure_opts);

        let global_make = settings
            .var("MAKEOPTS")
            .or_else(|| settings.var("MAKE_OPTS"))
            .map_or_else(|| vec![format!("-j{}", num_cpus::get())], |v| {
                split_flat(Some(v)).collect()
            });
        let mut make_opts = global_make;
        make_opts.extend(split_flat(settings.var(&key("MAKE_OPTS"))));
        make_opts.extend(overrides.make_opts);

        let mut make_install_opts: Vec<String> =
            split_flat(settings.var("MAKE_INSTALL_OPTS")).collect();
        make_install_opts.extend(split_flat(settings.var(&key("MAKE_INSTALL_OPTS"))));
        make_install_opts.extend(overrides.make_install_opts);

        let cflags = join_flags(&[
            settings.var("CFLAGS"),
            settings.var(&key("CFLAGS")),
            overrides.cflags.as_deref(),
        ]);

        Self {
            configure: settings
                .var(&key("CONFIGURE"))
                .map(str::to_string)
                .or(overrides.configure),
            prefix: settings
                .var(&key("PREFIX_PATH"))
                .map(PathBuf::from)
                .or(overrides.prefix),
            configure_opts,
            conditional_args: overrides.configure_args,
            make_opts,
            make_install_opts,
            cflags,
            cppflags: settings.var("CPPFLAGS").map(str::to_string),
            ldflags: settings.var("LDFLAGS").map(str::to_string),
            pkg_config_path: settings.var("PKG_CONFIG_PATH").map(str::to_string),
            path: settings.var("PATH").map(str::to_string),
            family,
        }
    }

    /// Add conditional arguments contributed by the definition. They are
    /// evaluated after the configured ones.
    #[must_use]
    pub fn with_definition_args(mut self, args: &[ConditionalArg]) -> Self {
        self.conditional_args.extend(args.iter().cloned());
        self
    }
}
