// tessera/core/execution/src/precompiles/bfs.rs

//! Directory service over the table namespace.
//!
//! Every directory is itself a table (key column `key`, one value column
//! `value`) holding six rows: `type`, `sub`, `acl-type`, `acl-white`,
//! `acl-black` and `extra`. `sub` is a JSON object mapping child names to
//! their type. The acl rows start as `0` and empty strings and are carried
//! for compatibility only. Leaves (tables and contracts) exist only as
//! entries in their parent's `sub` row.

use super::codes::{
    CODE_FILE_ALREADY_EXIST, CODE_FILE_BUILD_DIR_FAILED, CODE_FILE_INVALID_PATH,
    CODE_FILE_INVALID_TYPE, CODE_FILE_NOT_EXIST, CODE_SUCCESS,
};
use super::gas::{InterfaceOpcode, PrecompiledGas};
use super::utilities::{SelectorTable, USER_APPS_PREFIX, USER_TABLE_PREFIX};
use super::{addresses, Precompiled, PrecompiledContext, PrecompiledOutcome, S_TABLE_ADDRESS};
use crate::abi::{decode, encode};
use crate::crypto::CryptoSuite;
use crate::types::{ExecutorError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tessera_storage::{Entry, StorageError, StorageInterface};
use tracing::{debug, info};

pub const FS_ROOT: &str = "/";
pub const FS_TYPE_DIR: &str = "directory";
pub const FS_TYPE_TABLE: &str = "table";
pub const FS_TYPE_CONTRACT: &str = "contract";
pub const FS_PATH_MAX_LENGTH: usize = 56;
pub const FS_PATH_MAX_LEVEL: usize = 6;

const DIR_KEY_COLUMN: &str = "key";
const DIR_VALUE_COLUMN: &str = "value";
const ROW_TYPE: &str = "type";
const ROW_SUB: &str = "sub";
const ROW_ACL_TYPE: &str = "acl-type";
const ROW_ACL_WHITE: &str = "acl-white";
const ROW_ACL_BLACK: &str = "acl-black";
const ROW_EXTRA: &str = "extra";
/// No access control.
const ACL_TYPE_NONE: &str = "0";

const FORBIDDEN_SEGMENT_CHARS: &[char] = &['>', '<', '*', '?', '/', '=', '+', '(', ')', '$', '"', '\''];

/// `(name, type, extra)` as returned by `list`.
pub type BfsEntry = (String, String, Vec<String>);

type Children = BTreeMap<String, String>;

/// Creates `s_table_address` and the `/`, `/tables` and `/apps` directories
/// on a fresh backend. Existing tables are left untouched.
pub async fn init_system_tables(storage: &dyn StorageInterface) -> tessera_storage::Result<()> {
    if storage.open_table(S_TABLE_ADDRESS).await?.is_none() {
        storage
            .create_table(S_TABLE_ADDRESS, "address", vec!["path".into(), "kind".into()])
            .await?;
    }

    let root_children: Children = [
        ("apps".to_string(), FS_TYPE_DIR.to_string()),
        ("tables".to_string(), FS_TYPE_DIR.to_string()),
    ]
    .into_iter()
    .collect();
    let dirs = [
        (FS_ROOT, root_children),
        ("/tables", Children::new()),
        ("/apps", Children::new()),
    ];
    for (path, children) in dirs {
        if storage.open_table(path).await?.is_some() {
            continue;
        }
        storage
            .create_table(path, DIR_KEY_COLUMN, vec![DIR_VALUE_COLUMN.into()])
            .await?;
        for (key, entry) in directory_rows(&children)? {
            storage.set_row(path, key, entry).await?;
        }
        info!("Initialized directory {}", path);
    }
    Ok(())
}

fn encode_children(children: &Children) -> tessera_storage::Result<String> {
    serde_json::to_string(children).map_err(|e| StorageError::Codec(e.to_string()))
}

/// Metadata rows of a new directory holding `children`.
fn directory_rows(children: &Children) -> tessera_storage::Result<[(&'static str, Entry); 6]> {
    let value = |v: &str| Entry::new(vec![v.to_string()]);
    Ok([
        (ROW_TYPE, value(FS_TYPE_DIR)),
        (ROW_SUB, value(&encode_children(children)?)),
        (ROW_ACL_TYPE, value(ACL_TYPE_NONE)),
        (ROW_ACL_WHITE, value("")),
        (ROW_ACL_BLACK, value("")),
        (ROW_EXTRA, value("")),
    ])
}

/// Absolute path whose segments are all well formed.
fn check_path_segments(path: &str) -> bool {
    if !path.starts_with('/') {
        return false;
    }
    if path == FS_ROOT {
        return true;
    }
    path[1..].split('/').all(|segment| {
        let mut chars = segment.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphanumeric() => {
                chars.all(|c| !FORBIDDEN_SEGMENT_CHARS.contains(&c))
            }
            _ => false,
        }
    })
}

fn check_mkdir_path(path: &str) -> bool {
    check_path_segments(path)
        && path.len() <= FS_PATH_MAX_LENGTH
        && segments(path).len() <= FS_PATH_MAX_LEVEL
        && (path.starts_with(USER_TABLE_PREFIX) || path.starts_with(USER_APPS_PREFIX))
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn join(dir: &str, name: &str) -> String {
    if dir == FS_ROOT {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

fn parent_and_base(path: &str) -> (String, &str) {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", base)) => (FS_ROOT.to_string(), base),
        Some((parent, base)) => (parent.to_string(), base),
        None => (FS_ROOT.to_string(), path),
    }
}

async fn read_children(ctx: &PrecompiledContext<'_>, dir: &str) -> Result<Option<Children>> {
    match ctx.get_row(dir, ROW_SUB).await? {
        Some(entry) => serde_json::from_str(entry.field(0)).map(Some).map_err(|e| {
            ExecutorError::Storage(StorageError::CorruptSchema(format!(
                "{} sub row: {}",
                dir, e
            )))
        }),
        None => Ok(None),
    }
}

fn write_children(ctx: &mut PrecompiledContext<'_>, dir: &str, children: &Children) -> Result<()> {
    let json = encode_children(children)?;
    ctx.set_row(dir, ROW_SUB, Entry::new(vec![json]))
}

async fn make_dir(ctx: &mut PrecompiledContext<'_>, path: &str) -> Result<()> {
    ctx.create_table(path, DIR_KEY_COLUMN, vec![DIR_VALUE_COLUMN.into()])
        .await?;
    for (key, entry) in directory_rows(&Children::new())? {
        ctx.set_row(path, key, entry)?;
    }
    Ok(())
}

/// Type of the node at `path`, if any.
async fn lookup(ctx: &PrecompiledContext<'_>, path: &str) -> Result<Option<String>> {
    if path == FS_ROOT {
        return Ok(ctx
            .open_table(FS_ROOT)
            .await?
            .map(|_| FS_TYPE_DIR.to_string()));
    }
    let (parent, base) = parent_and_base(path);
    Ok(read_children(ctx, &parent)
        .await?
        .and_then(|mut children| children.remove(base)))
}

/// Makes sure every directory along `path` exists. Returns a business code
/// when a segment is already taken by something that is not a directory.
async fn build_dirs(ctx: &mut PrecompiledContext<'_>, path: &str) -> Result<i32> {
    if ctx.open_table(FS_ROOT).await?.is_none() {
        make_dir(ctx, FS_ROOT).await?;
    }
    let mut current = FS_ROOT.to_string();
    for segment in segments(path) {
        let mut children = read_children(ctx, &current).await?.unwrap_or_default();
        let child = join(&current, segment);
        match children.get(segment).map(String::as_str) {
            Some(FS_TYPE_DIR) => {}
            Some(other) => {
                debug!("Cannot build {}: {} is a {}", path, child, other);
                return Ok(CODE_FILE_BUILD_DIR_FAILED);
            }
            None => {
                if ctx.open_table(&child).await?.is_some() {
                    return Ok(CODE_FILE_BUILD_DIR_FAILED);
                }
                children.insert(segment.to_string(), FS_TYPE_DIR.to_string());
                write_children(ctx, &current, &children)?;
                make_dir(ctx, &child).await?;
            }
        }
        current = child;
    }
    Ok(CODE_SUCCESS)
}

/// Records a table or contract at `path` in its parent directory, building
/// missing ancestors.
pub(crate) async fn register_leaf(
    ctx: &mut PrecompiledContext<'_>,
    path: &str,
    file_type: &str,
) -> Result<i32> {
    let (parent, base) = parent_and_base(path);
    if base.is_empty() {
        return Ok(CODE_FILE_INVALID_PATH);
    }
    let code = build_dirs(ctx, &parent).await?;
    if code != CODE_SUCCESS {
        return Ok(code);
    }
    let mut children = read_children(ctx, &parent).await?.unwrap_or_default();
    if children.contains_key(base) {
        return Ok(CODE_FILE_ALREADY_EXIST);
    }
    children.insert(base.to_string(), file_type.to_string());
    write_children(ctx, &parent, &children)?;
    debug!("Registered {} {}", file_type, path);
    Ok(CODE_SUCCESS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BfsMethod {
    List,
    Mkdir,
    Touch,
}

pub struct BfsPrecompiled {
    methods: SelectorTable<BfsMethod>,
}

impl BfsPrecompiled {
    pub fn new(suite: &dyn CryptoSuite) -> Self {
        Self {
            methods: SelectorTable::new(
                suite,
                &[
                    ("list(string)", BfsMethod::List),
                    ("mkdir(string)", BfsMethod::Mkdir),
                    ("touch(string,string)", BfsMethod::Touch),
                ],
            ),
        }
    }

    async fn list(&self, ctx: &PrecompiledContext<'_>, path: &str) -> Result<(i32, Vec<BfsEntry>)> {
        if !check_path_segments(path) {
            return Ok((CODE_FILE_INVALID_PATH, Vec::new()));
        }
        let file_type = match lookup(ctx, path).await? {
            Some(file_type) => file_type,
            None => return Ok((CODE_FILE_NOT_EXIST, Vec::new())),
        };
        if file_type != FS_TYPE_DIR {
            let (_, base) = parent_and_base(path);
            return Ok((CODE_SUCCESS, vec![(base.to_string(), file_type, Vec::new())]));
        }
        let files = read_children(ctx, path)
            .await?
            .unwrap_or_default()
            .into_iter()
            .map(|(name, file_type)| (name, file_type, Vec::new()))
            .collect();
        Ok((CODE_SUCCESS, files))
    }

    async fn mkdir(&self, ctx: &mut PrecompiledContext<'_>, path: &str) -> Result<i32> {
        if !check_mkdir_path(path) {
            debug!("Rejected mkdir path {}", path);
            return Ok(CODE_FILE_INVALID_PATH);
        }
        if lookup(ctx, path).await?.is_some() {
            return Ok(CODE_FILE_ALREADY_EXIST);
        }
        build_dirs(ctx, path).await
    }

    async fn touch(
        &self,
        ctx: &mut PrecompiledContext<'_>,
        path: &str,
        file_type: &str,
    ) -> Result<i32> {
        if ctx.message().from != addresses::TABLE_MANAGER {
            return Err(ExecutorError::Precompiled(format!(
                "touch is reserved for system contracts, caller {}",
                ctx.message().from
            )));
        }
        if !matches!(file_type, FS_TYPE_DIR | FS_TYPE_TABLE | FS_TYPE_CONTRACT) {
            return Ok(CODE_FILE_INVALID_TYPE);
        }
        if !check_path_segments(path) || path == FS_ROOT {
            return Ok(CODE_FILE_INVALID_PATH);
        }
        if lookup(ctx, path).await?.is_some() {
            return Ok(CODE_FILE_ALREADY_EXIST);
        }
        if file_type == FS_TYPE_DIR {
            return build_dirs(ctx, path).await;
        }
        register_leaf(ctx, path, file_type).await
    }
}

#[async_trait]
impl Precompiled for BfsPrecompiled {
    fn name(&self) -> &'static str {
        "bfs"
    }

    async fn call(
        &self,
        ctx: &mut PrecompiledContext<'_>,
        input: &[u8],
    ) -> Result<PrecompiledOutcome> {
        let (method, args) = self.methods.dispatch(input)?;
        let mut gas = PrecompiledGas::new();
        gas.add_memory(input.len());

        let output = match method {
            BfsMethod::List => {
                let (path,): (String,) = decode(args)?;
                gas.append_operation(InterfaceOpcode::Select, 1);
                encode(&self.list(ctx, &path).await?)
            }
            BfsMethod::Mkdir => {
                let (path,): (String,) = decode(args)?;
                info!("BFS mkdir {} at block {}", path, ctx.block_number());
                gas.append_operation(InterfaceOpcode::CreateTable, 1);
                encode(&(self.mkdir(ctx, &path).await?,))
            }
            BfsMethod::Touch => {
                let (path, file_type): (String, String) = decode(args)?;
                gas.append_operation(InterfaceOpcode::Insert, 1);
                encode(&(self.touch(ctx, &path, &file_type).await?,))
            }
        };
        gas.add_memory(output.len());
        Ok(PrecompiledOutcome::finished(output, gas.total_gas()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{output, Harness};
    use super::*;
    use tessera_primitives::Address;

    async fn run(h: &mut Harness, input: Vec<u8>) -> Result<PrecompiledOutcome> {
        let bfs = BfsPrecompiled::new(&h.suite);
        let mut ctx = h.ctx();
        bfs.call(&mut ctx, &input).await
    }

    async fn list(h: &mut Harness, path: &str) -> (i32, Vec<BfsEntry>) {
        let input = h.input("list(string)", &(path.to_string(),));
        output(&run(h, input).await.unwrap())
    }

    async fn mkdir(h: &mut Harness, path: &str) -> i32 {
        let input = h.input("mkdir(string)", &(path.to_string(),));
        output::<(i32,)>(&run(h, input).await.unwrap()).0
    }

    fn names(files: &[BfsEntry]) -> Vec<(&str, &str)> {
        files
            .iter()
            .map(|(name, file_type, _)| (name.as_str(), file_type.as_str()))
            .collect()
    }

    #[test]
    fn test_path_rules() {
        assert!(check_path_segments("/"));
        assert!(check_path_segments("/tables/t_test"));
        assert!(check_path_segments("/apps/0abc-1.x"));
        assert!(!check_path_segments("tables"));
        assert!(!check_path_segments("/tables//x"));
        assert!(!check_path_segments("/tables/_x"));
        assert!(!check_path_segments("/tables/a$b"));

        assert!(check_mkdir_path("/apps/a/b/c/d/e"));
        assert!(!check_mkdir_path("/apps/a/b/c/d/e/f"));
        assert!(!check_mkdir_path(&format!("/apps/{}", "a".repeat(51))));
        assert!(check_mkdir_path(&format!("/apps/{}", "a".repeat(50))));
        assert!(!check_mkdir_path("/sys/x"));
    }

    #[test]
    fn test_parent_and_base() {
        assert_eq!(parent_and_base("/tables"), ("/".to_string(), "tables"));
        assert_eq!(parent_and_base("/tables/t"), ("/tables".to_string(), "t"));
    }

    #[tokio::test]
    async fn test_list_root_and_missing() {
        let mut h = Harness::new().await;
        let (code, files) = list(&mut h, "/").await;
        assert_eq!(code, CODE_SUCCESS);
        assert_eq!(names(&files), vec![("apps", "directory"), ("tables", "directory")]);

        assert_eq!(list(&mut h, "/tables/none").await, (CODE_FILE_NOT_EXIST, Vec::new()));
        assert_eq!(list(&mut h, "bad").await.0, CODE_FILE_INVALID_PATH);
    }

    #[tokio::test]
    async fn test_mkdir_recursive_and_conflicts() {
        let mut h = Harness::new().await;
        assert_eq!(mkdir(&mut h, "/apps/a/b").await, CODE_SUCCESS);
        assert_eq!(names(&list(&mut h, "/apps").await.1), vec![("a", "directory")]);
        assert_eq!(names(&list(&mut h, "/apps/a").await.1), vec![("b", "directory")]);
        assert_eq!(mkdir(&mut h, "/apps/a").await, CODE_FILE_ALREADY_EXIST);
        assert_eq!(mkdir(&mut h, "/other/a").await, CODE_FILE_INVALID_PATH);

        let mut ctx = h.ctx();
        assert_eq!(
            register_leaf(&mut ctx, "/apps/a/leaf", FS_TYPE_CONTRACT).await.unwrap(),
            CODE_SUCCESS
        );
        drop(ctx);
        assert_eq!(mkdir(&mut h, "/apps/a/leaf/x").await, CODE_FILE_BUILD_DIR_FAILED);
        let (code, files) = list(&mut h, "/apps/a/leaf").await;
        assert_eq!(code, CODE_SUCCESS);
        assert_eq!(names(&files), vec![("leaf", "contract")]);
    }

    #[tokio::test]
    async fn test_touch_is_restricted_and_typed() {
        let mut h = Harness::new().await;
        let touch = |t: &str| ("/tables/t1".to_string(), t.to_string());

        h.message.from = addresses::TABLE_MANAGER;
        let input = h.input("touch(string,string)", &touch("bogus"));
        assert_eq!(output::<(i32,)>(&run(&mut h, input).await.unwrap()), (CODE_FILE_INVALID_TYPE,));
        let input = h.input("touch(string,string)", &touch(FS_TYPE_TABLE));
        assert_eq!(output::<(i32,)>(&run(&mut h, input.clone()).await.unwrap()), (CODE_SUCCESS,));
        assert_eq!(
            output::<(i32,)>(&run(&mut h, input.clone()).await.unwrap()),
            (CODE_FILE_ALREADY_EXIST,)
        );

        h.message.from = Address::from_low_u64(0xabc);
        assert!(matches!(
            run(&mut h, input).await,
            Err(ExecutorError::Precompiled(_))
        ));
    }

    #[tokio::test]
    async fn test_directories_carry_all_metadata_rows() {
        let mut h = Harness::new().await;
        assert_eq!(mkdir(&mut h, "/apps/a").await, CODE_SUCCESS);

        let expected = [
            (ROW_TYPE, FS_TYPE_DIR),
            (ROW_ACL_TYPE, "0"),
            (ROW_ACL_WHITE, ""),
            (ROW_ACL_BLACK, ""),
            (ROW_EXTRA, ""),
        ];
        let ctx = h.ctx();
        for dir in [FS_ROOT, "/tables", "/apps", "/apps/a"] {
            for (key, value) in expected {
                let row = ctx.get_row(dir, key).await.unwrap();
                assert_eq!(row.map(|e| e.field(0).to_string()), Some(value.to_string()), "{} {}", dir, key);
            }
            assert!(ctx.get_row(dir, ROW_SUB).await.unwrap().is_some(), "{} sub", dir);
        }
        let sub = ctx.get_row("/apps/a", ROW_SUB).await.unwrap().unwrap();
        assert_eq!(sub.field(0), "{}");
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let storage = tessera_storage::MemoryStorage::new();
        init_system_tables(&storage).await.unwrap();
        storage
            .set_row("/tables", ROW_SUB, Entry::new(vec![r#"{"x":"table"}"#.into()]))
            .await
            .unwrap();
        init_system_tables(&storage).await.unwrap();
        let sub = storage.get_row("/tables", ROW_SUB).await.unwrap().unwrap();
        assert_eq!(sub.field(0), r#"{"x":"table"}"#);
    }
}
