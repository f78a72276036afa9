//! Loading syscall descriptions.
//!
//! A catalog is a JSON document listing types and syscalls. Types refer to each other by
//! name and may be declared in any order, ids follow the declaration order.

use crate::HashMap;
use kfuzz_core::{
    syscall::{SyscallBuilder, MAX_PARAMS_NUM},
    target::{Target, TargetBuilder},
    ty::*,
};
use serde::Deserialize;
use std::{fs::read_to_string, ops::RangeInclusive, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("type '{ty}' used by '{user}' is not declared")]
    UnknownType { ty: String, user: String },
    #[error("duplicate {what} '{name}'")]
    Duplicate { what: &'static str, name: String },
    #[error("invalid description of '{name}': {reason}")]
    Invalid { name: String, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Catalog {
    pub os: String,
    pub arch: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub ptr_sz: Option<u64>,
    #[serde(default)]
    pub page_sz: Option<u64>,
    #[serde(default)]
    pub page_num: Option<u64>,
    #[serde(default)]
    pub data_offset: Option<u64>,
    #[serde(default)]
    pub special_ptrs: Vec<u64>,
    #[serde(default = "default_true")]
    pub executor_uses_shmem: bool,
    #[serde(default = "default_true")]
    pub executor_uses_fork_server: bool,
    pub types: Vec<TypeDesc>,
    pub syscalls: Vec<SyscallDesc>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypeDesc {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub align: Option<u64>,
    #[serde(default)]
    pub optional: bool,
    #[serde(flatten)]
    pub kind: KindDesc,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KindDesc {
    Res {
        kinds: Vec<String>,
        #[serde(default)]
        special_vals: Vec<u64>,
    },
    Const {
        val: u64,
    },
    Int {
        #[serde(default)]
        range: Option<(u64, u64)>,
        #[serde(default)]
        val_align: u64,
    },
    Flags {
        vals: Vec<u64>,
        #[serde(default)]
        bitmask: bool,
    },
    Len {
        path: String,
        #[serde(default)]
        byte_unit: u64,
    },
    Proc {
        start: u64,
        per_proc: u64,
    },
    Csum {
        buf: String,
    },
    Vma {
        #[serde(default)]
        range: Option<(u64, u64)>,
    },
    Blob {
        #[serde(default)]
        range: Option<(u64, u64)>,
    },
    String {
        #[serde(default)]
        vals: Vec<String>,
        #[serde(default)]
        noz: bool,
    },
    Filename {
        #[serde(default)]
        vals: Vec<String>,
        #[serde(default)]
        noz: bool,
    },
    Array {
        elem: String,
        #[serde(default)]
        range: Option<(u64, u64)>,
    },
    Ptr {
        elem: String,
        dir: DirDesc,
    },
    Struct {
        fields: Vec<FieldDesc>,
    },
    Union {
        fields: Vec<FieldDesc>,
    },
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirDesc {
    In,
    Out,
    Inout,
}

impl From<DirDesc> for Dir {
    fn from(d: DirDesc) -> Self {
        match d {
            DirDesc::In => Dir::In,
            DirDesc::Out => Dir::Out,
            DirDesc::Inout => Dir::InOut,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldDesc {
    pub name: String,
    pub ty: String,
    #[serde(default)]
    pub dir: Option<DirDesc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyscallDesc {
    pub name: String,
    #[serde(default)]
    pub call_name: Option<String>,
    pub nr: u64,
    #[serde(default)]
    pub params: Vec<FieldDesc>,
    #[serde(default)]
    pub ret: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

/// Load target from the catalog at `path`.
pub fn load_target<P: AsRef<Path>>(path: P) -> Result<Target, LoadError> {
    load_catalog(path)?.build()
}

pub fn load_catalog<P: AsRef<Path>>(path: P) -> Result<Catalog, LoadError> {
    let path = path.as_ref();
    let content = read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_catalog(&content)
}

pub fn parse_catalog(content: &str) -> Result<Catalog, LoadError> {
    Ok(serde_json::from_str(content)?)
}

impl Catalog {
    pub fn build(&self) -> Result<Target, LoadError> {
        let mut ids: HashMap<&str, TypeId> = HashMap::default();
        for (i, ty) in self.types.iter().enumerate() {
            if ids.insert(&ty.name, i).is_some() {
                return Err(LoadError::Duplicate {
                    what: "type",
                    name: ty.name.clone(),
                });
            }
        }
        if self.special_ptrs.len() as u64 > PtrType::MAX_SPECIAL_POINTERS {
            return Err(LoadError::Invalid {
                name: self.os.clone(),
                reason: format!("{} special pointers", self.special_ptrs.len()),
            });
        }

        let mut b = TargetBuilder::new();
        b.os(&self.os[..])
            .arch(&self.arch[..])
            .revision(&self.revision[..])
            .special_ptrs(self.special_ptrs.clone());
        if let Some(sz) = self.ptr_sz {
            b.ptr_sz(sz);
        }
        if let Some(sz) = self.page_sz {
            b.page_sz(sz);
        }
        if let Some(n) = self.page_num {
            b.page_num(n);
        }
        if let Some(off) = self.data_offset {
            b.data_offset(off);
        }

        for desc in &self.types {
            let ty = build_ty(desc, &ids)?;
            b.ty(ty);
        }

        let mut names = HashMap::default();
        for desc in &self.syscalls {
            if names.insert(&desc.name[..], ()).is_some() {
                return Err(LoadError::Duplicate {
                    what: "syscall",
                    name: desc.name.clone(),
                });
            }
            if desc.params.len() > MAX_PARAMS_NUM {
                return Err(LoadError::Invalid {
                    name: desc.name.clone(),
                    reason: format!("{} params", desc.params.len()),
                });
            }
            let mut sb = SyscallBuilder::new();
            sb.nr(desc.nr)
                .name(&desc.name[..])
                .params(build_fields(&desc.params, &desc.name, &ids)?)
                .disabled(desc.disabled);
            if let Some(call_name) = desc.call_name.as_ref() {
                sb.call_name(&call_name[..]);
            }
            if let Some(ret) = desc.ret.as_ref() {
                let ret = lookup(ret, &desc.name, &ids)?;
                if !matches!(self.types[ret].kind, KindDesc::Res { .. }) {
                    return Err(LoadError::Invalid {
                        name: desc.name.clone(),
                        reason: format!("return type '{}' is not a resource", self.types[ret].name),
                    });
                }
                sb.ret(ret);
            }
            b.syscall(sb.build());
        }

        Ok(b.build())
    }
}

fn build_ty(desc: &TypeDesc, ids: &HashMap<&str, TypeId>) -> Result<Type, LoadError> {
    let mut cb = CommonInfoBuilder::new();
    cb.name(&desc.name[..]).optional(desc.optional);
    if let Some(size) = desc.size {
        cb.size(size).align(desc.align.unwrap_or(size));
    } else if let Some(align) = desc.align {
        cb.align(align);
    }
    let comm = cb.build();
    let invalid = |reason: &str| LoadError::Invalid {
        name: desc.name.clone(),
        reason: reason.to_string(),
    };
    let fixed = matches!(
        desc.kind,
        KindDesc::Res { .. }
            | KindDesc::Const { .. }
            | KindDesc::Int { .. }
            | KindDesc::Flags { .. }
            | KindDesc::Len { .. }
            | KindDesc::Proc { .. }
            | KindDesc::Csum { .. }
            | KindDesc::Vma { .. }
            | KindDesc::Ptr { .. }
    );
    if fixed && desc.size.is_none() {
        return Err(invalid("missing size"));
    }

    let ty: Type = match &desc.kind {
        KindDesc::Res {
            kinds,
            special_vals,
        } => {
            if kinds.is_empty() {
                return Err(invalid("resource without kind"));
            }
            let kinds = kinds.iter().map(|k| &k[..]).collect();
            ResType::new(comm, kinds, special_vals.clone()).into()
        }
        KindDesc::Const { val } => ConstType::new(comm, *val).into(),
        KindDesc::Int { range, val_align } => {
            IntType::new(comm, to_range(*range).map_err(|e| invalid(e))?, *val_align).into()
        }
        KindDesc::Flags { vals, bitmask } => {
            if vals.is_empty() {
                return Err(invalid("flags without values"));
            }
            FlagsType::new(comm, vals.clone(), *bitmask).into()
        }
        KindDesc::Len { path, byte_unit } => LenType::new(comm, &path[..], *byte_unit).into(),
        KindDesc::Proc { start, per_proc } => {
            if *per_proc == 0 {
                return Err(invalid("proc without values"));
            }
            ProcType::new(comm, *start, *per_proc).into()
        }
        KindDesc::Csum { buf } => CsumType::new(comm, &buf[..]).into(),
        KindDesc::Vma { range } => VmaType::new(comm, to_range(*range).map_err(|e| invalid(e))?).into(),
        KindDesc::Blob { range } => {
            BufferBlobType::new(comm, to_range(*range).map_err(|e| invalid(e))?).into()
        }
        KindDesc::String { vals, noz } => BufferStringType::new(comm, to_bytes(vals), *noz).into(),
        KindDesc::Filename { vals, noz } => {
            BufferFilenameType::new(comm, to_bytes(vals), *noz).into()
        }
        KindDesc::Array { elem, range } => ArrayType::new(
            comm,
            lookup(elem, &desc.name, ids)?,
            to_range(*range).map_err(|e| invalid(e))?,
        )
        .into(),
        KindDesc::Ptr { elem, dir } => {
            PtrType::new(comm, lookup(elem, &desc.name, ids)?, Dir::from(*dir)).into()
        }
        KindDesc::Struct { fields } => {
            StructType::new(comm, build_fields(fields, &desc.name, ids)?).into()
        }
        KindDesc::Union { fields } => {
            if fields.is_empty() {
                return Err(invalid("union without fields"));
            }
            UnionType::new(comm, build_fields(fields, &desc.name, ids)?).into()
        }
    };
    Ok(ty)
}

fn build_fields(
    fields: &[FieldDesc],
    user: &str,
    ids: &HashMap<&str, TypeId>,
) -> Result<Vec<Field>, LoadError> {
    fields
        .iter()
        .map(|f| {
            let ty = lookup(&f.ty, user, ids)?;
            Ok(match f.dir {
                Some(dir) => Field::with_dir(&f.name[..], ty, dir.into()),
                None => Field::new(&f.name[..], ty),
            })
        })
        .collect()
}

fn lookup(ty: &str, user: &str, ids: &HashMap<&str, TypeId>) -> Result<TypeId, LoadError> {
    ids.get(ty).copied().ok_or_else(|| LoadError::UnknownType {
        ty: ty.to_string(),
        user: user.to_string(),
    })
}

fn to_range(range: Option<(u64, u64)>) -> Result<Option<RangeInclusive<u64>>, &'static str> {
    match range {
        Some((lo, hi)) if lo > hi => Err("empty range"),
        Some((lo, hi)) => Ok(Some(lo..=hi)),
        None => Ok(None),
    }
}

fn to_bytes(vals: &[String]) -> Vec<Vec<u8>> {
    vals.iter().map(|v| v.as_bytes().to_vec()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kfuzz_core::{gen::gen_prog, select::ChoiceTable};
    use rand::{prelude::SmallRng, SeedableRng};

    const CATALOG: &str = r#"{
        "os": "linux",
        "arch": "amd64",
        "revision": "test",
        "special_ptrs": [0, 18446744073709551615],
        "types": [
            {"name": "ptr_filename", "kind": "ptr", "size": 8, "elem": "filename", "dir": "in"},
            {"name": "filename", "kind": "filename"},
            {"name": "fd", "kind": "res", "size": 4, "kinds": ["fd"], "special_vals": [18446744073709551615]},
            {"name": "open_flags", "kind": "flags", "size": 4, "vals": [0, 1, 2, 64], "bitmask": true},
            {"name": "blob", "kind": "blob"},
            {"name": "ptr_out_blob", "kind": "ptr", "size": 8, "elem": "blob", "dir": "out"},
            {"name": "len_buf", "kind": "len", "size": 8, "path": "buf"}
        ],
        "syscalls": [
            {"name": "open", "nr": 2, "ret": "fd", "params": [
                {"name": "file", "ty": "ptr_filename"},
                {"name": "flags", "ty": "open_flags"}
            ]},
            {"name": "read", "nr": 0, "params": [
                {"name": "fd", "ty": "fd"},
                {"name": "buf", "ty": "ptr_out_blob"},
                {"name": "count", "ty": "len_buf"}
            ]},
            {"name": "close", "nr": 3, "params": [{"name": "fd", "ty": "fd"}]}
        ]
    }"#;

    #[test]
    fn build_catalog() {
        let catalog = parse_catalog(CATALOG).unwrap();
        assert!(catalog.executor_uses_shmem);
        let target = catalog.build().unwrap();
        assert_eq!(target.all_syscalls().len(), 3);
        let open = target.syscall_of_name("open").unwrap();
        assert!(open.ret().is_some());
        let read = target.syscall_of_name("read").unwrap().id();
        assert!(target.res_output_syscall("fd").contains(&open.id()));
        assert!(target.res_input_syscall("fd").contains(&read));

        let ct = ChoiceTable::new(&target, None);
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..64 {
            let p = gen_prog(&target, &ct, &mut rng, 8);
            assert!(p.len() <= 8);
        }
    }

    #[test]
    fn reject_bad_catalogs() {
        let unknown = CATALOG.replace("\"elem\": \"blob\"", "\"elem\": \"no_such_type\"");
        assert!(matches!(
            parse_catalog(&unknown).unwrap().build(),
            Err(LoadError::UnknownType { .. })
        ));
        let dup = CATALOG.replace("\"name\": \"blob\"", "\"name\": \"filename\"");
        assert!(matches!(
            parse_catalog(&dup).unwrap().build(),
            Err(LoadError::Duplicate { .. })
        ));
        let no_size = CATALOG.replace(
            "\"kind\": \"len\", \"size\": 8,",
            "\"kind\": \"len\",",
        );
        assert!(matches!(
            parse_catalog(&no_size).unwrap().build(),
            Err(LoadError::Invalid { .. })
        ));
        assert!(matches!(
            load_target("/no/such/catalog.json"),
            Err(LoadError::Io { .. })
        ));
        assert!(matches!(parse_catalog("{"), Err(LoadError::Json(_))));
    }
}
