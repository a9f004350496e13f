//! `dynproxy check`: Synthesize every proxy a manifest declares and report failures.

use std::path::Path;

use crate::manifest::Manifest;

/// Outcome of one declared proxy
#[derive(Debug)]
pub struct CheckLine {
    pub label: String,
    pub result: Result<String, String>,
}

pub fn run(manifest: &Manifest, config_path: Option<&Path>) -> anyhow::Result<Vec<CheckLine>> {
    let generator = manifest.instantiate(super::load_config(config_path)?)?;
    let lines = manifest
        .proxies
        .iter()
        .map(|decl| {
            let result = decl
                .synthesize(&generator)
                .map(|ty| generator.scope().type_name(&ty))
                .map_err(|e| format!("{:#}", e));
            if let Err(message) = &result {
                tracing::debug!("{} failed: {}", decl.label(), message);
            }
            CheckLine {
                label: decl.label(),
                result,
            }
        })
        .collect();
    Ok(lines)
}

pub fn execute(manifest_path: &Path, config_path: Option<&Path>) -> anyhow::Result<()> {
    let manifest = Manifest::load(manifest_path)?;
    let lines = run(&manifest, config_path)?;

    let mut failures = 0;
    for line in &lines {
        match &line.result {
            Ok(name) => println!("  ok     {} -> {}", line.label, name),
            Err(message) => {
                failures += 1;
                println!("  FAILED {}: {}", line.label, message);
            }
        }
    }
    println!();
    println!("{} proxies, {} failed", lines.len(), failures);

    if failures > 0 {
        anyhow::bail!("{} of {} proxies failed to generate", failures, lines.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_reports_each_proxy() {
        let manifest = Manifest::from_json_str(
            r#"{
                "types": [
                    { "name": "A.IThing", "kind": "interface",
                      "methods": [{ "name": "Run", "returns": "i32" }] },
                    { "name": "A.Locked", "kind": "class", "sealed": true }
                ],
                "proxies": [
                    { "kind": "interface-without-target", "target": "A.IThing" },
                    { "kind": "class", "target": "A.Locked" },
                    { "kind": "class", "target": "A.IThing" }
                ]
            }"#,
        )
        .unwrap();
        let lines = run(&manifest, None).unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].result.is_ok());
        assert!(lines[1].result.as_ref().unwrap_err().contains("A.Locked"));
        assert!(lines[2].result.is_err());
    }

    #[test]
    fn test_config_file_sets_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("dynproxy.toml");
        std::fs::write(&config, "proxy_namespace = \"Custom.Proxies\"\n").unwrap();

        let manifest = Manifest::from_json_str(
            r#"{
                "types": [{ "name": "A.IThing", "kind": "interface" }],
                "proxies": [{ "kind": "interface-without-target", "target": "A.IThing" }]
            }"#,
        )
        .unwrap();
        let lines = run(&manifest, Some(&config)).unwrap();
        assert!(lines[0].result.as_ref().unwrap().starts_with("Custom.Proxies."));
    }
}
