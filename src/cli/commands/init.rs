//! New and Config commands.

use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::config::Settings;

const SAMPLE_PAGES: &[(&str, &str)] = &[
    (
        "intro.md",
        "# Introduction\n\nWelcome. Pages are plain Markdown files; folders become listings.\n\n\
         See [the notes](notes/keywords.md) for how search keywords work.\n",
    ),
    (
        "notes/keywords.md",
        "# Keywords\n\nkeywords: search, tags\n\n\
         Lines starting with `keywords:` or `tags:` feed the `keyword` search strategy.\n",
    ),
    (
        "private.md",
        "# Private\n\nListed under `privacy.private`: never served, listed or indexed.\n",
    ),
    (
        "hide.md",
        "# Hidden\n\nListed under `privacy.hide`.\n",
    ),
];

/// Write a default configuration file and a sample content directory next to it.
pub fn run_new(config_path: &Path, force: bool) -> anyhow::Result<()> {
    let path = Settings::init_config_file(config_path, force)?;
    println!("Created configuration file at: {}", path.display());

    let mut settings = Settings::default();
    settings.privacy.private = vec!["private.md".to_string()];
    settings.privacy.hide = vec!["hide.md".to_string()];
    settings.save(&path)?;

    // Content lives where `Settings::load_from` will look for it
    let mut resolved = settings.clone();
    resolved.resolve_relative_to(path.parent().unwrap_or_else(|| Path::new("")));
    let root = resolved.content.root;
    let mut written = 0;
    for (relative, body) in SAMPLE_PAGES {
        let target = root.join(relative);
        if target.exists() && !force {
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&target, body).with_context(|| format!("Failed to write {}", target.display()))?;
        written += 1;
    }

    println!("Wrote {written} sample pages under: {}", root.display());
    println!(
        "Run `yb serve -c {}` and open http://localhost:{}{}/",
        path.display(),
        settings.server.port,
        settings.server.content_router
    );
    Ok(())
}

/// Print the effective configuration.
pub fn run_config(config: &Settings) {
    println!("Current Configuration:");
    println!("{}", "=".repeat(50));
    match toml::to_string_pretty(config) {
        Ok(toml_str) => println!("{toml_str}"),
        Err(e) => eprintln!("Error displaying config: {e}"),
    }
}
