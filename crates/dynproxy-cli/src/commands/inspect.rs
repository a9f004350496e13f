//! `dynproxy inspect`: Print the synthesized proxy types of a manifest.

use std::path::Path;

use anyhow::{anyhow, Context};

use crate::manifest::Manifest;

/// Render every proxy (or those whose target matches `only`) as text
pub fn render(
    manifest: &Manifest,
    config_path: Option<&Path>,
    only: Option<&str>,
) -> anyhow::Result<Vec<(String, String)>> {
    let generator = manifest.instantiate(super::load_config(config_path)?)?;
    let mut dumps = Vec::new();
    for decl in &manifest.proxies {
        if only.is_some_and(|target| target != decl.target) {
            continue;
        }
        let ty = decl
            .synthesize(&generator)
            .with_context(|| format!("cannot generate {}", decl.label()))?;
        let id = ty
            .type_id()
            .ok_or_else(|| anyhow!("{} did not produce a named type", decl.label()))?;
        let name = generator.scope().type_name(&ty);
        let dump = generator.scope().dump_type(id)?;
        dumps.push((name, format!("// {}\n{}", decl.label(), dump)));
    }
    Ok(dumps)
}

pub fn execute(
    manifest_path: &Path,
    config_path: Option<&Path>,
    only: Option<&str>,
    out_dir: Option<&Path>,
) -> anyhow::Result<()> {
    let manifest = Manifest::load(manifest_path)?;
    let dumps = render(&manifest, config_path, only)?;
    if dumps.is_empty() {
        eprintln!("No proxies matched");
        return Ok(());
    }

    match out_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            for (name, dump) in &dumps {
                let path = dir.join(format!("{}.txt", name));
                std::fs::write(&path, dump)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("Wrote {}", path.display());
            }
        }
        None => {
            for (_, dump) in &dumps {
                println!("{}", dump);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "types": [
            { "name": "A.IThing", "kind": "interface",
              "methods": [{ "name": "Run", "params": [{ "name": "n", "type": "i32" }], "returns": "i32" }] },
            { "name": "A.Thing", "kind": "class", "implements": ["A.IThing"],
              "methods": [{ "name": "Run", "params": [{ "name": "n", "type": "i32" }], "returns": "i32", "virtual": true }] }
        ],
        "proxies": [
            { "kind": "interface-without-target", "target": "A.IThing" },
            { "kind": "class", "target": "A.Thing" }
        ]
    }"#;

    #[test]
    fn test_render_lists_intercepted_members() {
        let manifest = Manifest::from_json_str(MANIFEST).unwrap();
        let dumps = render(&manifest, None, None).unwrap();
        assert_eq!(dumps.len(), 2);
        for (name, dump) in &dumps {
            assert!(dump.contains(name.as_str()));
            assert!(dump.contains("Run"));
        }
    }

    #[test]
    fn test_filter_by_target() {
        let manifest = Manifest::from_json_str(MANIFEST).unwrap();
        let dumps = render(&manifest, None, Some("A.Thing")).unwrap();
        assert_eq!(dumps.len(), 1);
        assert!(dumps[0].1.starts_with("// class A.Thing"));
        assert!(render(&manifest, None, Some("A.Other")).unwrap().is_empty());
    }

    #[test]
    fn test_execute_writes_dumps() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("things.json");
        std::fs::write(&manifest_path, MANIFEST).unwrap();
        let out = dir.path().join("out");

        execute(&manifest_path, None, None, Some(&out)).unwrap();
        let written = std::fs::read_dir(&out).unwrap().count();
        assert_eq!(written, 2);
    }
}
