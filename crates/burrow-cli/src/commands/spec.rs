//! Container spec assembly from a JSON file plus command-line flags.

use std::path::PathBuf;

use anyhow::Context;
use burrow_common::config::load_container_spec;
use burrow_common::types::{BindMount, ContainerSpec, MountSpec, OverlayMount, TmpfsMount};
use clap::{ArgMatches, Args};

/// Flags shared by `run` and `plan`. They layer on top of `--spec`.
#[derive(Args, Debug, Default)]
pub struct SpecArgs {
    /// JSON container spec to start from.
    #[arg(long, value_name = "FILE")]
    pub spec: Option<PathBuf>,

    /// New user namespace; the caller is mapped to root inside.
    #[arg(long)]
    pub user: bool,
    /// New PID namespace (applies to the executed program's children).
    #[arg(long)]
    pub pid: bool,
    /// New mount namespace (implied by any mount or --root).
    #[arg(long)]
    pub mount: bool,
    /// New network namespace.
    #[arg(long)]
    pub net: bool,
    /// New IPC namespace.
    #[arg(long)]
    pub ipc: bool,
    /// New UTS namespace.
    #[arg(long)]
    pub uts: bool,
    /// New cgroup namespace.
    #[arg(long)]
    pub cgroup: bool,

    /// Hostname inside the UTS namespace (requires --uts).
    #[arg(long)]
    pub hostname: Option<String>,

    /// Tmpfs mount: TARGET[:SIZE], e.g. /tmp:64MiB.
    #[arg(long, value_name = "TARGET[:SIZE]", value_parser = parse_tmpfs)]
    pub tmpfs: Vec<MountSpec>,

    /// Bind mount: SRC:DST[:ro].
    #[arg(long, value_name = "SRC:DST[:ro]", value_parser = parse_bind)]
    pub bind: Vec<MountSpec>,

    /// Overlay mount: LOWER1[:LOWER2..],UPPER,WORK,TARGET.
    #[arg(long, value_name = "LOWERS,UPPER,WORK,TARGET", value_parser = parse_overlay)]
    pub overlay: Vec<MountSpec>,

    /// Directory to pivot into after mounting.
    #[arg(long, value_name = "PATH")]
    pub root: Option<PathBuf>,
}

impl SpecArgs {
    /// Builds the final spec: the file (if any), then namespace flags OR-ed
    /// in, then flag mounts appended in command-line order.
    ///
    /// `matches` are the subcommand's matches; they carry the positions
    /// needed to interleave `--tmpfs`, `--bind`, and `--overlay` correctly.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec file cannot be loaded or the result
    /// fails validation.
    pub fn resolve(self, matches: &ArgMatches) -> anyhow::Result<ContainerSpec> {
        let mut spec = match &self.spec {
            Some(path) => load_container_spec(path)
                .with_context(|| format!("failed to load spec {}", path.display()))?,
            None => ContainerSpec::default(),
        };

        let ns = &mut spec.namespace;
        ns.user |= self.user;
        ns.pid |= self.pid;
        ns.mount |= self.mount;
        ns.net |= self.net;
        ns.ipc |= self.ipc;
        ns.uts |= self.uts;
        ns.cgroup |= self.cgroup;
        if self.hostname.is_some() {
            ns.hostname.clone_from(&self.hostname);
        }
        if self.root.is_some() {
            spec.root.clone_from(&self.root);
        }

        spec.mounts.extend(self.mounts_in_order(matches));
        spec.validate().context("invalid container spec")?;
        Ok(spec)
    }

    fn mounts_in_order(self, matches: &ArgMatches) -> Vec<MountSpec> {
        let mut indexed: Vec<(usize, MountSpec)> = Vec::new();
        for (id, values) in [
            ("tmpfs", self.tmpfs),
            ("bind", self.bind),
            ("overlay", self.overlay),
        ] {
            let positions = matches.indices_of(id).into_iter().flatten();
            indexed.extend(positions.zip(values));
        }
        indexed.sort_by_key(|(position, _)| *position);
        indexed.into_iter().map(|(_, mount)| mount).collect()
    }
}

/// Parses `TARGET[:SIZE]`.
///
/// # Errors
///
/// Returns a message if the size is malformed.
pub fn parse_tmpfs(arg: &str) -> Result<MountSpec, String> {
    let (target, size_bytes) = match arg.split_once(':') {
        Some((target, size)) => (target, Some(parse_size(size)?)),
        None => (arg, None),
    };
    Ok(MountSpec::Tmpfs(TmpfsMount {
        target: non_empty(target, "tmpfs target")?.into(),
        size_bytes,
    }))
}

/// Parses `SRC:DST[:ro|rw]`.
///
/// # Errors
///
/// Returns a message if either path is missing or the mode is unknown.
pub fn parse_bind(arg: &str) -> Result<MountSpec, String> {
    let mut parts = arg.splitn(3, ':');
    let source = non_empty(parts.next().unwrap_or_default(), "bind source")?;
    let target = non_empty(parts.next().unwrap_or_default(), "bind target")?;
    let readonly = match parts.next() {
        None | Some("rw") => false,
        Some("ro") => true,
        Some(other) => return Err(format!("unknown bind mode {other:?}, expected ro or rw")),
    };
    Ok(MountSpec::Bind(BindMount {
        source: source.into(),
        target: target.into(),
        readonly,
    }))
}

/// Parses `LOWER1[:LOWER2..],UPPER,WORK,TARGET`.
///
/// # Errors
///
/// Returns a message unless exactly four non-empty fields are given.
pub fn parse_overlay(arg: &str) -> Result<MountSpec, String> {
    let fields: Vec<&str> = arg.split(',').collect();
    let [lowers, upper, work, target] = fields.as_slice() else {
        return Err(format!(
            "expected LOWERS,UPPER,WORK,TARGET, got {} field(s)",
            fields.len()
        ));
    };
    let lower_dirs = lowers
        .split(':')
        .map(|l| non_empty(l, "overlay lower dir").map(PathBuf::from))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MountSpec::Overlay(OverlayMount {
        lower_dirs,
        upper_dir: non_empty(upper, "overlay upper dir")?.into(),
        work_dir: non_empty(work, "overlay work dir")?.into(),
        target: non_empty(target, "overlay target")?.into(),
    }))
}

/// Parses a byte size with an optional `KiB`/`MiB`/`GiB`/`KB`/`MB`/`GB`
/// suffix.
///
/// # Errors
///
/// Returns a message if the number is malformed or overflows.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (num_str, multiplier) = if let Some(n) = s.strip_suffix("GiB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("GB") {
        (n, 1_000_000_000)
    } else if let Some(n) = s.strip_suffix("MiB") {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("MB") {
        (n, 1_000_000)
    } else if let Some(n) = s.strip_suffix("KiB") {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix("KB") {
        (n, 1000)
    } else {
        (s, 1)
    };
    num_str
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid size {s:?}: {e}"))?
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size {s:?} is too large"))
}

fn non_empty<'a>(value: &'a str, what: &str) -> Result<&'a str, String> {
    if value.is_empty() {
        Err(format!("{what} is empty"))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, FromArgMatches};

    use crate::commands::{Cli, Command};

    fn resolve(args: &[&str]) -> anyhow::Result<ContainerSpec> {
        let matches = Cli::command().try_get_matches_from(args)?;
        let cli = Cli::from_arg_matches(&matches)?;
        let (_, sub) = matches.subcommand().unwrap();
        match cli.command {
            Command::Plan(plan) => plan.spec.resolve(sub),
            Command::Run(run) => run.spec.resolve(sub),
        }
    }

    #[test]
    fn parse_size_mib() {
        assert_eq!(parse_size("10MiB"), Ok(10 * 1024 * 1024));
    }

    #[test]
    fn parse_size_gb() {
        assert_eq!(parse_size("2GB"), Ok(2_000_000_000));
    }

    #[test]
    fn parse_size_plain_bytes() {
        assert_eq!(parse_size("4096"), Ok(4096));
    }

    #[test]
    fn parse_size_invalid() {
        assert!(parse_size("lots").is_err());
        assert!(parse_size("99999999999999GiB").is_err());
    }

    #[test]
    fn tmpfs_with_and_without_size() {
        assert_eq!(
            parse_tmpfs("/tmp:64MiB"),
            Ok(MountSpec::Tmpfs(TmpfsMount {
                target: "/tmp".into(),
                size_bytes: Some(64 * 1024 * 1024),
            }))
        );
        assert_eq!(
            parse_tmpfs("/run"),
            Ok(MountSpec::Tmpfs(TmpfsMount {
                target: "/run".into(),
                size_bytes: None,
            }))
        );
    }

    #[test]
    fn bind_modes() {
        let MountSpec::Bind(ro) = parse_bind("/srv/data:/data:ro").unwrap() else {
            panic!("expected bind");
        };
        assert!(ro.readonly);
        assert_eq!(ro.source, PathBuf::from("/srv/data"));

        let MountSpec::Bind(rw) = parse_bind("/a:/b").unwrap() else {
            panic!("expected bind");
        };
        assert!(!rw.readonly);

        assert!(parse_bind("/a:/b:rx").is_err());
        assert!(parse_bind("/only-source").is_err());
    }

    #[test]
    fn overlay_with_multiple_lowers() {
        let MountSpec::Overlay(o) = parse_overlay("/l1:/l2,/u,/w,/merged").unwrap() else {
            panic!("expected overlay");
        };
        assert_eq!(o.lower_dirs, vec![PathBuf::from("/l1"), PathBuf::from("/l2")]);
        assert_eq!(o.upper_dir, PathBuf::from("/u"));
        assert_eq!(o.work_dir, PathBuf::from("/w"));
        assert_eq!(o.target, PathBuf::from("/merged"));
    }

    #[test]
    fn overlay_needs_four_fields() {
        assert!(parse_overlay("/l,/u,/w").is_err());
        assert!(parse_overlay("/l1:,/u,/w,/m").is_err());
    }

    #[test]
    fn flag_mounts_keep_command_line_order() {
        let spec = resolve(&[
            "burrow",
            "plan",
            "--bind",
            "/srv/data:/data",
            "--tmpfs",
            "/data/cache",
            "--bind",
            "/etc/hosts:/etc/hosts:ro",
        ])
        .unwrap();
        let targets: Vec<_> = spec.mounts.iter().map(|m| m.target().to_path_buf()).collect();
        assert_eq!(
            targets,
            vec![
                PathBuf::from("/data"),
                PathBuf::from("/data/cache"),
                PathBuf::from("/etc/hosts")
            ]
        );
    }

    #[test]
    fn flags_layer_on_top_of_spec_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("spec.json");
        std::fs::write(
            &file,
            r#"{"namespace": {"user": true}, "mounts": [{"type": "tmpfs", "target": "/tmp"}]}"#,
        )
        .unwrap();

        let spec = resolve(&[
            "burrow",
            "plan",
            "--spec",
            file.to_str().unwrap(),
            "--uts",
            "--hostname",
            "box",
            "--tmpfs",
            "/run",
        ])
        .unwrap();
        assert!(spec.namespace.user);
        assert!(spec.namespace.uts);
        assert_eq!(spec.namespace.hostname.as_deref(), Some("box"));
        assert_eq!(spec.mounts.len(), 2);
        assert_eq!(spec.mounts[0].target(), PathBuf::from("/tmp"));
        assert_eq!(spec.mounts[1].target(), PathBuf::from("/run"));
    }

    #[test]
    fn invalid_result_is_rejected() {
        let err = resolve(&["burrow", "plan", "--hostname", "box"]).unwrap_err();
        assert!(format!("{err:#}").contains("UTS"));
    }
}
