//! `burrow plan`: show what `run` would set up, without touching the kernel.

use std::fmt::{self, Write};

use burrow_common::constants::PIVOT_OLD_DIR;
use burrow_common::types::{ContainerSpec, MountSpec};
use clap::{ArgMatches, Args};

use super::spec::SpecArgs;
use crate::output::{RULE, format_bytes, join_paths};

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Container spec file and flags.
    #[command(flatten)]
    pub spec: SpecArgs,

    /// Print the resolved spec as JSON instead of a plan.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `plan` command.
///
/// # Errors
///
/// Returns an error if the spec cannot be loaded or is invalid.
pub fn execute(args: PlanArgs, matches: &ArgMatches) -> anyhow::Result<()> {
    let json = args.json;
    let spec = args.spec.resolve(matches)?;

    let text = if json {
        serde_json::to_string_pretty(&spec)?
    } else {
        let mut text = String::new();
        render(&spec, &mut text)?;
        text
    };
    println!("{}", text.trim_end());
    Ok(())
}

/// Renders the setup steps for `spec` in the order the child performs them.
///
/// # Errors
///
/// Only fails if `out` does.
pub fn render(spec: &ContainerSpec, out: &mut impl Write) -> fmt::Result {
    let ns = spec.effective_namespace();
    let root = spec.root.as_deref();

    writeln!(out, "Container plan")?;
    writeln!(out, "{RULE}")?;

    let enabled = ns.enabled();
    if enabled.is_empty() {
        writeln!(out, "  namespaces: none")?;
    } else {
        write!(out, "  namespaces: {}", enabled.join(", "))?;
        if ns.mount && !spec.namespace.mount {
            write!(out, " (mnt implied)")?;
        }
        writeln!(out)?;
    }
    if ns.user {
        writeln!(out, "  identity:   caller mapped to uid 0 / gid 0")?;
    }
    if ns.mount {
        writeln!(out, "  propagation: / remounted recursive private")?;
    }
    if let Some(hostname) = &ns.hostname {
        writeln!(out, "  hostname:   {hostname}")?;
    }

    if !spec.mounts.is_empty() {
        writeln!(out)?;
        writeln!(out, "  Mounts (applied in order, undone in reverse on failure):")?;
        for (i, mount) in spec.mounts.iter().enumerate() {
            write!(out, "    {}. {:<8} {}", i + 1, mount.kind(), mount.target().display())?;
            match mount {
                MountSpec::Tmpfs(m) => match m.size_bytes {
                    Some(size) => write!(out, "  size {}", format_bytes(size))?,
                    None => write!(out, "  size kernel default")?,
                },
                MountSpec::Bind(m) => {
                    write!(out, "  <- {}", m.source.display())?;
                    if m.readonly {
                        write!(out, "  (ro)")?;
                    }
                }
                MountSpec::Overlay(m) => write!(
                    out,
                    "  lower={} upper={} work={}",
                    join_paths(&m.lower_dirs),
                    m.upper_dir.display(),
                    m.work_dir.display()
                )?,
            }
            writeln!(out)?;

            let mount_point = mount.mount_point(root);
            if mount_point != mount.target() {
                writeln!(out, "         at {}", mount_point.display())?;
            }
        }
    }

    if let Some(root) = root {
        writeln!(out)?;
        writeln!(out, "  Root: {}", root.display())?;
        writeln!(out, "    pivot_root, old root detached from /{PIVOT_OLD_DIR}")?;
    }

    writeln!(out)?;
    writeln!(out, "  {} mount(s) will be applied.", spec.mounts.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_common::types::{BindMount, NamespaceSpec, TmpfsMount};

    fn rendered(spec: &ContainerSpec) -> String {
        let mut text = String::new();
        render(spec, &mut text).unwrap();
        text
    }

    #[test]
    fn empty_spec_has_no_namespaces() {
        let text = rendered(&ContainerSpec::default());
        assert!(text.contains("namespaces: none"));
        assert!(text.contains("0 mount(s)"));
    }

    #[test]
    fn mounts_are_numbered_and_resolved_under_root() {
        let spec = ContainerSpec {
            namespace: NamespaceSpec {
                user: true,
                ..NamespaceSpec::default()
            },
            mounts: vec![
                MountSpec::Tmpfs(TmpfsMount {
                    target: "/tmp".into(),
                    size_bytes: Some(10 * 1024 * 1024),
                }),
                MountSpec::Bind(BindMount {
                    source: "/usr".into(),
                    target: "/usr".into(),
                    readonly: true,
                }),
            ],
            root: Some("/srv/rootfs".into()),
        };
        let text = rendered(&spec);

        assert!(text.contains("namespaces: user, mnt (mnt implied)"), "{text}");
        assert!(text.contains("1. tmpfs    /tmp  size 10.0 MiB"), "{text}");
        assert!(text.contains("at /srv/rootfs/tmp"), "{text}");
        assert!(text.contains("2. bind     /usr  <- /usr  (ro)"), "{text}");
        assert!(text.contains("Root: /srv/rootfs"), "{text}");
        assert!(text.contains("2 mount(s)"), "{text}");
    }

    #[test]
    fn without_root_mount_points_are_not_repeated() {
        let spec = ContainerSpec {
            mounts: vec![MountSpec::Tmpfs(TmpfsMount {
                target: "/tmp".into(),
                size_bytes: None,
            })],
            ..ContainerSpec::default()
        };
        let text = rendered(&spec);
        assert!(!text.contains(" at "), "{text}");
        assert!(text.contains("size kernel default"));
    }
}
