//! Revision script generation.
//!
//! Writes a new revision module from the file-name template, registers it in
//! `lib.rs` at the anchor comments, and runs the configured post-write hooks
//! over the fresh file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use rand::Rng;
use time::OffsetDateTime;
use tracing::info;

pub const DEFAULT_FILE_TEMPLATE: &str = "{year}_{month}_{day}_{rev}_{slug}";

const MOD_ANCHOR: &str = "// generate:mod";
const ENTRY_ANCHOR: &str = "// generate:entry";

/// An external command run against a freshly generated revision file.
#[derive(Debug, Clone)]
pub struct PostWriteHook {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
}

impl PostWriteHook {
    pub fn new(name: &str, program: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_owned(),
            program: program.to_owned(),
            args: args.iter().map(|a| (*a).to_owned()).collect(),
        }
    }
}

/// The fixed hook chain the `manage` group installs before dispatching.
pub fn default_post_write_hooks() -> Vec<PostWriteHook> {
    vec![PostWriteHook::new("rustfmt", "rustfmt", &["--edition", "2021"])]
}

#[derive(Debug)]
pub struct RevisionScript {
    pub revision_id: String,
    pub module_name: String,
    pub path: PathBuf,
}

/// Generate a new revision script under `version_dir` and register it in the
/// crate manifest at `script_dir/lib.rs`.
pub fn new_revision(
    version_dir: &Path,
    script_dir: &Path,
    message: &str,
    file_template: &str,
    hooks: &[PostWriteHook],
) -> io::Result<RevisionScript> {
    let revision_id = new_revision_id();
    let slug = slugify(message);
    let stem = render_file_template(
        file_template,
        OffsetDateTime::now_utc(),
        &revision_id,
        &slug,
    );
    // module identifiers cannot start with a digit
    let module_name = format!("m{stem}");
    let path = version_dir.join(format!("{module_name}.rs"));

    fs::write(&path, revision_template(message))?;
    register_module(&script_dir.join("lib.rs"), &module_name)?;
    run_hooks(hooks, &path)?;

    info!(revision = %revision_id, path = %path.display(), "new revision script written");
    Ok(RevisionScript {
        revision_id,
        module_name,
        path,
    })
}

pub fn new_revision_id() -> String {
    let id: u64 = rand::rng().random();
    format!("{:012x}", id & 0xffff_ffff_ffff)
}

pub fn slugify(message: &str) -> String {
    let mut slug = String::new();
    for c in message.chars().flat_map(|c| c.to_lowercase()) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug: String = slug.trim_end_matches('_').chars().take(40).collect();
    if slug.is_empty() {
        "revision".to_owned()
    } else {
        slug
    }
}

fn render_file_template(template: &str, now: OffsetDateTime, rev: &str, slug: &str) -> String {
    template
        .replace("{year}", &now.year().to_string())
        .replace("{month}", &format!("{:02}", u8::from(now.month())))
        .replace("{day}", &format!("{:02}", now.day()))
        .replace("{rev}", rev)
        .replace("{slug}", slug)
}

fn register_module(lib_path: &Path, module_name: &str) -> io::Result<()> {
    let source = fs::read_to_string(lib_path)?;
    let source = insert_before(&source, MOD_ANCHOR, &format!("mod {module_name};\n"))
        .ok_or_else(|| anchor_missing(MOD_ANCHOR, lib_path))?;
    let source = insert_before(
        &source,
        ENTRY_ANCHOR,
        &format!("        entry::<{module_name}::Migration>(),\n"),
    )
    .ok_or_else(|| anchor_missing(ENTRY_ANCHOR, lib_path))?;
    fs::write(lib_path, source)
}

fn anchor_missing(anchor: &str, lib_path: &Path) -> io::Error {
    io::Error::other(format!(
        "missing `{anchor}` anchor in {}",
        lib_path.display()
    ))
}

fn insert_before(source: &str, anchor: &str, line: &str) -> Option<String> {
    let idx = source.find(anchor)?;
    let line_start = source[..idx].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let mut out = String::with_capacity(source.len() + line.len());
    out.push_str(&source[..line_start]);
    out.push_str(line);
    out.push_str(&source[line_start..]);
    Some(out)
}

fn run_hooks(hooks: &[PostWriteHook], path: &Path) -> io::Result<()> {
    for hook in hooks {
        let status = Command::new(&hook.program)
            .args(&hook.args)
            .arg(path)
            .status()?;
        if !status.success() {
            return Err(io::Error::other(format!(
                "post-write hook {} exited with {status}",
                hook.name
            )));
        }
        info!(hook = %hook.name, "post-write hook finished");
    }
    Ok(())
}

fn revision_template(message: &str) -> String {
    format!(
        r#"//! {message}

use sea_orm_migration::prelude::*;

use crate::executor::LiveExecutor;
use crate::runner::MigrationContext;
use crate::RevisionOps;

#[derive(DeriveMigrationName, Default)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {{
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {{
        let mut exec = LiveExecutor::new(manager.get_connection());
        self.apply_up(&mut MigrationContext::new(&mut exec)).await
    }}

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {{
        let mut exec = LiveExecutor::new(manager.get_connection());
        self.apply_down(&mut MigrationContext::new(&mut exec)).await
    }}
}}

#[async_trait::async_trait]
impl RevisionOps for Migration {{
    async fn apply_up(&self, ctx: &mut MigrationContext<'_>) -> Result<(), DbErr> {{
        // schema changes for this revision go here
        let _ = ctx;
        Ok(())
    }}

    async fn apply_down(&self, ctx: &mut MigrationContext<'_>) -> Result<(), DbErr> {{
        let _ = ctx;
        Ok(())
    }}
}}
"#
    )
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const LIB_FIXTURE: &str = "\
mod m2025_01_01_aaaaaaaaaaaa_init;
// generate:mod -- new revision modules are registered above this line

pub fn entries() -> Vec<RevisionEntry> {
    vec![
        entry::<m2025_01_01_aaaaaaaaaaaa_init::Migration>(),
        // generate:entry -- new revision entries are registered above this line
    ]
}
";

    #[test]
    fn slugify_collapses_noise() {
        assert_eq!(slugify("Add users table!"), "add_users_table");
        assert_eq!(slugify("  --weird--  input  "), "weird_input");
        assert_eq!(slugify(""), "revision");
    }

    #[test]
    fn revision_ids_are_twelve_hex_chars() {
        let id = new_revision_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn file_template_renders_date_fields() {
        let epoch = OffsetDateTime::from_unix_timestamp(0).unwrap();
        let stem = render_file_template(DEFAULT_FILE_TEMPLATE, epoch, "deadbeef0123", "init");
        assert_eq!(stem, "1970_01_01_deadbeef0123_init");
    }

    #[test]
    fn new_revision_writes_script_and_registers_it() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lib.rs"), LIB_FIXTURE).unwrap();

        let script = new_revision(
            dir.path(),
            dir.path(),
            "add sessions",
            DEFAULT_FILE_TEMPLATE,
            &[],
        )
        .unwrap();

        let body = fs::read_to_string(&script.path).unwrap();
        assert!(body.contains("impl RevisionOps for Migration"));

        let lib = fs::read_to_string(dir.path().join("lib.rs")).unwrap();
        assert!(lib.contains(&format!("mod {};", script.module_name)));
        assert!(lib.contains(&format!("entry::<{}::Migration>(),", script.module_name)));
        // existing registrations survive
        assert!(lib.contains("mod m2025_01_01_aaaaaaaaaaaa_init;"));
    }

    #[test]
    fn consecutive_revisions_get_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lib.rs"), LIB_FIXTURE).unwrap();

        let first =
            new_revision(dir.path(), dir.path(), "same", DEFAULT_FILE_TEMPLATE, &[]).unwrap();
        let second =
            new_revision(dir.path(), dir.path(), "same", DEFAULT_FILE_TEMPLATE, &[]).unwrap();
        assert_ne!(first.revision_id, second.revision_id);
    }

    #[test]
    fn missing_anchor_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lib.rs"), "pub fn entries() {}\n").unwrap();

        let err = new_revision(dir.path(), dir.path(), "x", DEFAULT_FILE_TEMPLATE, &[])
            .unwrap_err();
        assert!(err.to_string().contains("generate:mod"));
    }
}
