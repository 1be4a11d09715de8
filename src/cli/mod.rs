//! CN-013: CLI subcommands: init, validate, synth, order.

use crate::core::{assembly, parser, resolver, types};
use clap::Subcommand;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new cairn project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate cairn.yaml without synthesizing
    Validate {
        /// Path to cairn.yaml
        #[arg(short, long, default_value = "cairn.yaml")]
        file: PathBuf,
    },

    /// Synthesize one deployment document per unit
    Synth {
        /// Path to cairn.yaml
        #[arg(short, long, default_value = "cairn.yaml")]
        file: PathBuf,

        /// Output directory (overrides settings.outdir)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Document format: json or yaml (overrides settings.format)
        #[arg(long)]
        format: Option<types::DocumentFormat>,

        /// Skip writing manifest.json
        #[arg(long)]
        no_manifest: bool,
    },

    /// Show unit emission order and resource dependencies
    Order {
        /// Path to cairn.yaml
        #[arg(short, long, default_value = "cairn.yaml")]
        file: PathBuf,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Synth {
            file,
            out,
            format,
            no_manifest,
        } => cmd_synth(&file, out.as_deref(), format, no_manifest),
        Commands::Order { file } => cmd_order(&file),
    }
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("cairn.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }
    std::fs::create_dir_all(path).map_err(|e| format!("cannot create {}: {}", path.display(), e))?;

    let template = r#"version: "1.0"
name: my-app
description: "Synthesized by cairn"

params:
  env: dev

units:
  storage:
    description: "Shared storage"
    resources:
      bucket:
        type: AWS::S3::Bucket
        properties:
          BucketName: "my-app-{{params.env}}-data"

  service:
    resources:
      role:
        type: AWS::IAM::Role
        properties:
          DataBucketArn: "{{attr:storage/bucket.Arn}}"

settings:
  format: json
  outdir: cairn.out
  manifest: true
"#;
    std::fs::write(&config_path, template)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized cairn project at {}", path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);

    if errors.is_empty() {
        let resources: usize = config.units.values().map(|u| u.resources.len()).sum();
        println!(
            "OK: {} ({} units, {} resources)",
            config.name,
            config.units.len(),
            resources
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

/// Parse and validate a cairn config file, returning errors if invalid.
fn parse_and_validate(file: &Path) -> Result<types::AppConfig, String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);
    if errors.is_empty() {
        return Ok(config);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err("validation failed".to_string())
}

fn cmd_synth(
    file: &Path,
    out: Option<&Path>,
    format: Option<types::DocumentFormat>,
    no_manifest: bool,
) -> Result<(), String> {
    let mut config = parse_and_validate(file)?;
    if let Some(format) = format {
        config.settings.format = format;
    }
    if no_manifest {
        config.settings.manifest = false;
    }
    let outdir = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&config.settings.outdir));

    let app = resolver::build_app(&config).map_err(|e| e.to_string())?;
    let assembly = app.synth().map_err(|e| e.to_string())?;
    assembly::write_assembly(&assembly, &outdir).map_err(|e| e.to_string())?;

    println!(
        "Synthesized: {} ({} documents) → {}",
        assembly.app,
        assembly.documents.len(),
        outdir.display()
    );
    for doc in &assembly.documents {
        println!("  {} {} ({})", doc.file_name, doc.hash, doc.template.resources.len());
    }
    Ok(())
}

fn cmd_order(file: &Path) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let app = resolver::build_app(&config).map_err(|e| e.to_string())?;
    let tree = app.tree();
    let graph = app.graph();
    let order = graph.unit_order(tree).map_err(|e| e.to_string())?;
    let preds = graph.resource_predecessors(tree);

    println!("Order: {} ({} units)", app.name(), order.len());
    for (i, unit) in order.iter().enumerate() {
        let deps: Vec<&str> = graph
            .unit_dependencies(*unit)
            .into_iter()
            .map(|u| tree.path(u))
            .collect();
        if deps.is_empty() {
            println!("{}. {}", i + 1, tree.path(*unit));
        } else {
            println!("{}. {} (after {})", i + 1, tree.path(*unit), deps.join(", "));
        }
        for resource in tree.resources_within(*unit) {
            let after: Vec<&str> = preds
                .get(&resource)
                .map(|p| p.iter().map(|id| tree.path(*id)).collect())
                .unwrap_or_default();
            if after.is_empty() {
                println!("   - {}", tree.path(resource));
            } else {
                println!("   - {} ← {}", tree.path(resource), after.join(", "));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, yaml: &str) -> PathBuf {
        let path = dir.join("cairn.yaml");
        std::fs::write(&path, yaml).unwrap();
        path
    }

    const VALID: &str = r#"
version: "1.0"
name: test
units:
  net:
    resources:
      vpc:
        type: AWS::EC2::VPC
  app:
    resources:
      server:
        type: AWS::EC2::Instance
        properties:
          VpcId: "{{ref:net/vpc}}"
"#;

    #[test]
    fn test_cn013_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("test-project");
        cmd_init(&sub).unwrap();
        assert!(sub.join("cairn.yaml").exists());
    }

    #[test]
    fn test_cn013_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cairn.yaml"), "exists").unwrap();
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_cn013_init_template_synthesizes() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path()).unwrap();
        let out = dir.path().join("out");
        cmd_synth(&dir.path().join("cairn.yaml"), Some(&out), None, false).unwrap();
        assert!(out.join("storage.template.json").exists());
        assert!(out.join("service.template.json").exists());
        assert!(out.join("manifest.json").exists());
    }

    #[test]
    fn test_cn013_validate_valid() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_config(dir.path(), VALID);
        cmd_validate(&file).unwrap();
    }

    #[test]
    fn test_cn013_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_config(dir.path(), "version: \"9\"\nname: \"\"\n");
        let err = cmd_validate(&file).unwrap_err();
        assert!(err.contains("2 validation error(s)"));
    }

    #[test]
    fn test_cn013_synth_writes_documents() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_config(dir.path(), VALID);
        let out = dir.path().join("out");
        cmd_synth(&file, Some(&out), Some(types::DocumentFormat::Yaml), true).unwrap();
        assert!(out.join("net.template.yaml").exists());
        let body = std::fs::read_to_string(out.join("app.template.yaml")).unwrap();
        assert!(body.contains("Fn::ImportValue"));
        assert!(!out.join("manifest.json").exists());
    }

    #[test]
    fn test_cn013_synth_reports_scope_violation() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_config(
            dir.path(),
            r#"
version: "1.0"
name: test
units:
  a:
    resources:
      x:
        type: T::X
  b:
    resources:
      y:
        type: T::Y
        depends_on: [a/x]
"#,
        );
        let out = dir.path().join("out");
        let err = cmd_synth(&file, Some(&out), None, false).unwrap_err();
        assert!(err.contains("scope violation"));
        assert!(!out.exists());
    }

    #[test]
    fn test_cn013_order() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_config(dir.path(), VALID);
        cmd_order(&file).unwrap();
    }

    #[test]
    fn test_cn013_missing_file() {
        let err = cmd_validate(Path::new("/nonexistent/cairn.yaml")).unwrap_err();
        assert!(err.contains("failed to read"));
    }
}
