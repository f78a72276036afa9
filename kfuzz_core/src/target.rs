//! Description of the fuzzed kernel: syscalls, types and resource relations.

use crate::{
    context::Context,
    syscall::{Syscall, SyscallBuilder, SyscallId},
    ty::*,
    value::{GroupValue, IntegerValue, Value},
    HashMap, HashSet, RngType,
};
use rand::Rng;

/// Generator of struct or union values that need special care, such as `timespec`.
///
/// It receives the old value when called for mutation.
pub type SpecialGen = fn(&mut Context, &mut RngType, TypeId, Dir, Option<&Value>) -> Value;

/// Name of the blob type squashed pointees are converted to.
pub const ANY_BLOB_NAME: &str = "ANYBLOB";

#[derive(Debug, Clone)]
pub struct Target {
    /// Name of target os.
    os: Box<str>,
    /// Target arch.
    arch: Box<str>,
    /// Ptr size of target arch.
    ptr_sz: u64,
    /// Page size of target os.
    page_sz: u64,
    /// Page number of the data area.
    page_num: u64,
    /// Special pointer values.
    special_ptrs: Box<[u64]>,
    /// Start address of the data area.
    data_offset: u64,
    /// Description revision.
    revision: Box<str>,
    /// All syscalls of current os, sorted by `SyscallId`.
    all_syscalls: Vec<Syscall>,
    /// All types, sorted by `TypeId`.
    tys: Vec<Type>,
    /// Syscall name to syscall id mapping.
    syscall_name_mapping: HashMap<Box<str>, SyscallId>,
    /// Type name to type id mapping.
    ty_name_mapping: HashMap<Box<str>, TypeId>,
    /// All resource kind.
    res_kinds: Vec<ResKind>,
    /// Kind chain of each resource kind.
    res_chains: HashMap<ResKind, Box<[ResKind]>>,
    /// Input resource kinds of each syscall.
    syscall_input_res: Vec<Vec<ResKind>>,
    /// Output resource kinds of each syscall.
    syscall_output_res: Vec<Vec<ResKind>>,
    /// Syscalls that use the resource as input.
    res_input_syscall: HashMap<ResKind, Vec<SyscallId>>,
    /// Syscalls that can output the resource or a more specific one.
    res_output_syscall: HashMap<ResKind, Vec<SyscallId>>,
    any_blob: TypeId,
    special_gens: HashMap<Box<str>, SpecialGen>,
}

impl Target {
    #[inline(always)]
    pub fn os(&self) -> &str {
        &self.os
    }

    #[inline(always)]
    pub fn arch(&self) -> &str {
        &self.arch
    }

    #[inline(always)]
    pub fn ptr_sz(&self) -> u64 {
        self.ptr_sz
    }

    #[inline(always)]
    pub fn page_num(&self) -> u64 {
        self.page_num
    }

    #[inline(always)]
    pub fn page_sz(&self) -> u64 {
        self.page_sz
    }

    #[inline(always)]
    pub fn special_ptrs(&self) -> &[u64] {
        &self.special_ptrs
    }

    #[inline(always)]
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    #[inline(always)]
    pub fn revision(&self) -> &str {
        &self.revision
    }

    #[inline]
    pub fn target_name(&self) -> String {
        format!("{}/{}", self.os, self.arch)
    }

    #[inline]
    pub fn mem_size(&self) -> u64 {
        self.page_num * self.page_sz
    }

    #[inline(always)]
    pub fn all_syscalls(&self) -> &[Syscall] {
        &self.all_syscalls
    }

    /// Ids of syscalls not disabled by the description.
    pub fn enabled_syscalls(&self) -> Vec<SyscallId> {
        self.all_syscalls
            .iter()
            .filter(|s| !s.disabled())
            .map(|s| s.id())
            .collect()
    }

    #[inline(always)]
    pub fn tys(&self) -> &[Type] {
        &self.tys
    }

    #[inline(always)]
    pub fn res_kinds(&self) -> &[ResKind] {
        &self.res_kinds
    }

    #[inline]
    pub fn res_chain(&self, kind: &str) -> &[ResKind] {
        self.res_chains.get(kind).map(|c| &c[..]).unwrap_or(&[])
    }

    /// Whether a resource of kind `src` can be passed to `dst`.
    #[inline]
    pub fn res_compatible(&self, dst: &ResType, src: &str) -> bool {
        dst.compatible(self.res_chain(src))
    }

    #[inline]
    pub fn res_output_syscall(&self, res_kind: &str) -> &[SyscallId] {
        self.res_output_syscall
            .get(res_kind)
            .map(|s| &s[..])
            .unwrap_or(&[])
    }

    #[inline]
    pub fn res_input_syscall(&self, res_kind: &str) -> &[SyscallId] {
        self.res_input_syscall
            .get(res_kind)
            .map(|s| &s[..])
            .unwrap_or(&[])
    }

    #[inline(always)]
    pub fn syscall_output_res(&self, sid: SyscallId) -> &[ResKind] {
        &self.syscall_output_res[sid]
    }

    #[inline(always)]
    pub fn syscall_input_res(&self, sid: SyscallId) -> &[ResKind] {
        &self.syscall_input_res[sid]
    }

    #[inline(always)]
    pub fn ty_of(&self, tid: TypeId) -> &Type {
        &self.tys[tid]
    }

    #[inline]
    pub fn ty_of_name(&self, name: &str) -> Option<&Type> {
        self.ty_name_mapping.get(name).map(|&tid| &self.tys[tid])
    }

    #[inline(always)]
    pub fn syscall_of(&self, sid: SyscallId) -> &Syscall {
        &self.all_syscalls[sid]
    }

    #[inline]
    pub fn syscall_of_name(&self, name: &str) -> Option<&Syscall> {
        self.syscall_name_mapping
            .get(name)
            .map(|&sid| &self.all_syscalls[sid])
    }

    /// Blob type of squashed pointees.
    #[inline(always)]
    pub fn any_blob(&self) -> TypeId {
        self.any_blob
    }

    #[inline]
    pub fn special_gen(&self, ty: &Type) -> Option<SpecialGen> {
        if !matches!(ty.kind(), TypeKind::Struct | TypeKind::Union) {
            return None;
        }
        self.special_gens.get(ty.name()).copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TargetBuilder {
    os: Option<String>,
    arch: Option<String>,
    ptr_sz: Option<u64>,
    page_sz: Option<u64>,
    page_num: Option<u64>,
    revision: Option<String>,
    special_ptrs: Vec<u64>,
    data_offset: Option<u64>,
    syscalls: Vec<Syscall>,
    tys: Vec<Type>,
    special_gens: Vec<(String, SpecialGen)>,
}

impl TargetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn os<T: Into<String>>(&mut self, os: T) -> &mut Self {
        self.os = Some(os.into());
        self
    }

    pub fn arch<T: Into<String>>(&mut self, arch: T) -> &mut Self {
        self.arch = Some(arch.into());
        self
    }

    pub fn ptr_sz(&mut self, sz: u64) -> &mut Self {
        self.ptr_sz = Some(sz);
        self
    }

    pub fn page_sz(&mut self, sz: u64) -> &mut Self {
        self.page_sz = Some(sz);
        self
    }

    pub fn page_num(&mut self, num: u64) -> &mut Self {
        self.page_num = Some(num);
        self
    }

    pub fn revision<T: Into<String>>(&mut self, revision: T) -> &mut Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn special_ptrs(&mut self, ptrs: Vec<u64>) -> &mut Self {
        self.special_ptrs = ptrs;
        self
    }

    pub fn data_offset(&mut self, data_offset: u64) -> &mut Self {
        self.data_offset = Some(data_offset);
        self
    }

    /// Add a type, returns its id.
    pub fn ty<T: Into<Type>>(&mut self, ty: T) -> TypeId {
        let mut ty = ty.into();
        let id = self.tys.len();
        ty.set_id(id);
        self.tys.push(ty);
        id
    }

    /// Id the next added type will get.
    pub fn next_ty_id(&self) -> TypeId {
        self.tys.len()
    }

    /// Add a syscall, returns its id.
    pub fn syscall(&mut self, mut syscall: Syscall) -> SyscallId {
        let id = self.syscalls.len();
        syscall.set_id(id);
        self.syscalls.push(syscall);
        id
    }

    pub fn special_gen<T: Into<String>>(&mut self, name: T, gen: SpecialGen) -> &mut Self {
        self.special_gens.push((name.into(), gen));
        self
    }

    pub fn build(mut self) -> Target {
        assert!(
            self.special_ptrs.len() as u64 <= PtrType::MAX_SPECIAL_POINTERS,
            "too many special pointers"
        );
        if self.special_ptrs.is_empty() {
            self.special_ptrs.push(0);
        }
        let any_blob = match self.tys.iter().find(|ty| ty.name() == ANY_BLOB_NAME) {
            Some(ty) => ty.id(),
            None => {
                let comm = CommonInfoBuilder::new().name(ANY_BLOB_NAME).build();
                self.ty(BufferBlobType::new(comm, None))
            }
        };
        let syscalls = self.syscalls;
        let tys = self.tys;
        let syscall_name_mapping = syscalls
            .iter()
            .map(|s| (s.name().to_string().into_boxed_str(), s.id()))
            .collect::<HashMap<_, _>>();
        let mut ty_name_mapping = HashMap::default();
        for ty in tys.iter() {
            ty_name_mapping
                .entry(ty.name().to_string().into_boxed_str())
                .or_insert_with(|| ty.id());
        }
        // kind chain of each resource
        let mut res_chains: HashMap<ResKind, Box<[ResKind]>> = HashMap::default();
        for ty in tys.iter().filter_map(|ty| ty.as_res()) {
            for i in 1..=ty.kinds().len() {
                let kind = ty.kinds()[i - 1].clone();
                res_chains
                    .entry(kind)
                    .or_insert_with(|| ty.kinds()[..i].to_vec().into_boxed_slice());
            }
        }
        let mut res_kinds = res_chains.keys().cloned().collect::<Vec<_>>();
        res_kinds.sort_unstable();
        // collect input/output syscalls for resources
        let mut syscall_input_res = Vec::with_capacity(syscalls.len());
        let mut syscall_output_res = Vec::with_capacity(syscalls.len());
        let mut res_input_syscall: HashMap<ResKind, HashSet<SyscallId>> = HashMap::default();
        let mut res_output_syscall: HashMap<ResKind, HashSet<SyscallId>> = HashMap::default();
        for syscall in syscalls.iter() {
            let (input_res, output_res) = analyze_res_usage(syscall, &tys);
            for ir in &input_res {
                res_input_syscall
                    .entry(ir.clone())
                    .or_default()
                    .insert(syscall.id());
            }
            for or in &output_res {
                // a producer of `or` also produces every kind `or` refines.
                for kind in res_chains[or].iter() {
                    res_output_syscall
                        .entry(kind.clone())
                        .or_default()
                        .insert(syscall.id());
                }
            }
            syscall_input_res.push(input_res);
            syscall_output_res.push(output_res);
        }
        let sorted = |m: HashMap<ResKind, HashSet<SyscallId>>| {
            m.into_iter()
                .map(|(kind, syscalls)| {
                    let mut syscalls = syscalls.into_iter().collect::<Vec<_>>();
                    syscalls.sort_unstable();
                    (kind, syscalls)
                })
                .collect::<HashMap<_, _>>()
        };

        Target {
            os: self.os.unwrap_or_else(|| "linux".to_string()).into_boxed_str(),
            arch: self.arch.unwrap_or_else(|| "amd64".to_string()).into_boxed_str(),
            ptr_sz: self.ptr_sz.unwrap_or(8),
            page_sz: self.page_sz.unwrap_or(4 << 10),
            page_num: self.page_num.unwrap_or(4 << 10),
            special_ptrs: self.special_ptrs.into_boxed_slice(),
            data_offset: self.data_offset.unwrap_or(0x2000_0000),
            revision: self.revision.unwrap_or_default().into_boxed_str(),
            all_syscalls: syscalls,
            tys,
            syscall_name_mapping,
            ty_name_mapping,
            res_kinds,
            res_chains,
            syscall_input_res,
            syscall_output_res,
            res_input_syscall: sorted(res_input_syscall),
            res_output_syscall: sorted(res_output_syscall),
            any_blob,
            special_gens: self
                .special_gens
                .into_iter()
                .map(|(name, gen)| (name.into_boxed_str(), gen))
                .collect(),
        }
    }
}

/// Resource kinds consumed and produced by `syscall`.
pub fn analyze_res_usage(syscall: &Syscall, tys: &[Type]) -> (Vec<ResKind>, Vec<ResKind>) {
    let mut ctx = AnalyzeContext {
        tys,
        input_res: HashSet::default(),
        output_res: HashSet::default(),
        visited: HashSet::default(),
    };

    for field in syscall.params() {
        analyze_ty(&mut ctx, field.ty(), field.dir_or(Dir::In));
    }

    if let Some(ty) = syscall.ret() {
        analyze_ty(&mut ctx, ty, Dir::Out);
    }

    let mut input_res = ctx.input_res.into_iter().collect::<Vec<_>>();
    let mut output_res = ctx.output_res.into_iter().collect::<Vec<_>>();
    input_res.sort_unstable();
    output_res.sort_unstable();
    (input_res, output_res)
}

struct AnalyzeContext<'a> {
    tys: &'a [Type],
    input_res: HashSet<ResKind>,
    output_res: HashSet<ResKind>,
    visited: HashSet<(TypeId, Dir)>,
}

fn analyze_ty(ctx: &mut AnalyzeContext, tid: TypeId, dir: Dir) {
    let ty = &ctx.tys[tid];
    match ty.kind() {
        TypeKind::Res => {
            let name = ty.checked_as_res().res_name().clone();
            if dir != Dir::In {
                ctx.output_res.insert(name.clone());
            }
            if dir != Dir::Out && !ty.optional() {
                ctx.input_res.insert(name);
            }
        }
        TypeKind::Ptr => {
            let ty = ty.checked_as_ptr();
            analyze_ty(ctx, ty.elem(), ty.dir());
        }
        TypeKind::Array => {
            let ty = ty.checked_as_array();
            analyze_ty(ctx, ty.elem(), dir);
        }
        TypeKind::Struct | TypeKind::Union => {
            if ctx.visited.insert((tid, dir)) {
                let fields = if let Some(ty) = ty.as_struct() {
                    ty.fields()
                } else {
                    ty.checked_as_union().fields()
                };
                for f in fields {
                    analyze_ty(ctx, f.ty(), f.dir_or(dir));
                }
            }
        }
        _ => (),
    }
}

fn timespec_gen(
    ctx: &mut Context,
    rng: &mut RngType,
    tid: TypeId,
    dir: Dir,
    _old: Option<&Value>,
) -> Value {
    let fields = ctx.target().ty_of(tid).checked_as_struct().fields();
    let (sec_ty, nsec_ty) = (fields[0].ty(), fields[1].ty());
    let (sec, nsec) = if rng.gen() {
        (0, 0)
    } else {
        (rng.gen_range(0..=10), rng.gen_range(0..1_000_000_000))
    };
    GroupValue::new(
        tid,
        dir,
        vec![
            IntegerValue::new(sec_ty, dir, sec).into(),
            IntegerValue::new(nsec_ty, dir, nsec).into(),
        ],
    )
    .into()
}

fn int_comm(name: &str, size: u64) -> CommonInfo {
    CommonInfoBuilder::new()
        .name(name)
        .size(size)
        .align(size)
        .build()
}

fn varlen_comm(name: &str) -> CommonInfo {
    CommonInfoBuilder::new().name(name).build()
}

/// A small linux-like target, used by tests, benches and the demo worker.
pub fn test_target() -> Target {
    let mut b = TargetBuilder::new();
    b.os("linux")
        .arch("amd64")
        .revision("kfuzz-test")
        .special_ptrs(vec![0, u64::MAX, 0x9999_0000_0000]);

    let int8 = b.ty(IntType::new(int_comm("int8", 1), None, 0));
    let int16 = b.ty(IntType::new(int_comm("int16", 2), None, 0));
    let int32 = b.ty(IntType::new(int_comm("int32", 4), None, 0));
    let int64 = b.ty(IntType::new(int_comm("int64", 8), None, 0));
    let int32_range = b.ty(IntType::new(int_comm("int32_range", 4), Some(0..=10), 0));
    let int16_aligned = b.ty(IntType::new(
        int_comm("int16_aligned", 2),
        Some(0..=0x100),
        4,
    ));
    let const_zero = b.ty(ConstType::new(int_comm("const_zero", 4), 0));
    let open_flags = b.ty(FlagsType::new(
        int_comm("open_flags", 4),
        vec![0, 1, 2, 0x40, 0x80, 0x200, 0x400],
        true,
    ));
    let mmap_prot = b.ty(FlagsType::new(
        int_comm("mmap_prot", 4),
        vec![0, 1, 2, 4],
        false,
    ));
    let fd = b.ty(ResType::new(
        int_comm("fd", 4),
        vec!["fd"],
        vec![u64::MAX, 0xffff_ff9c],
    ));
    let sock = b.ty(ResType::new(
        int_comm("sock", 4),
        vec!["fd", "sock"],
        vec![u64::MAX],
    ));
    let filename = b.ty(BufferFilenameType::new(varlen_comm("filename"), Vec::new(), false));
    let fs_name = b.ty(BufferStringType::new(
        varlen_comm("fs_name"),
        vec![b"ext4\0".to_vec(), b"tmpfs\0".to_vec()],
        false,
    ));
    let blob = b.ty(BufferBlobType::new(varlen_comm("blob"), None));
    let blob16 = b.ty(BufferBlobType::new(int_comm("blob16", 16), Some(16..=16)));
    let blob_range = b.ty(BufferBlobType::new(varlen_comm("blob_range"), Some(4..=64)));
    let array_int32 = b.ty(ArrayType::new(varlen_comm("array_int32"), int32, None));
    let array_fd2 = b.ty(ArrayType::new(int_comm("array_fd2", 8), fd, Some(2..=2)));
    let sec = b.ty(IntType::new(int_comm("timespec_sec", 8), None, 0));
    let nsec = b.ty(IntType::new(int_comm("timespec_nsec", 8), None, 0));
    let timespec = b.ty(StructType::new(
        int_comm("timespec", 16),
        vec![Field::new("sec", sec), Field::new("nsec", nsec)],
    ));
    let sockaddr = b.ty(UnionType::new(
        varlen_comm("sockaddr"),
        vec![Field::new("ipv4", int32), Field::new("raw", blob16)],
    ));
    let hdr_len = b.ty(LenType::new(int_comm("hdr_len", 4), "parent", 0));
    let hdr = b.ty(StructType::new(
        int_comm("hdr", 8),
        vec![Field::new("len", hdr_len), Field::new("flags", int32)],
    ));
    let csum = b.ty(CsumType::new(int_comm("csum", 2), "payload"));
    let pkt_len = b.ty(LenType::new(int_comm("pkt_len", 2), "payload", 0));
    let pkt = b.ty(StructType::new(
        varlen_comm("pkt"),
        vec![
            Field::new("csum", csum),
            Field::new("len", pkt_len),
            Field::new("proto", int8),
            Field::new("pad", const_zero),
            Field::new("payload", blob_range),
        ],
    ));
    let port = b.ty(ProcType::new(int_comm("port", 2), 20000, 4));
    let vma = b.ty(VmaType::new(int_comm("vma", 8), Some(1..=4)));
    let ptr_filename = b.ty(PtrType::new(int_comm("ptr_filename", 8), filename, Dir::In));
    let ptr_fs_name = b.ty(PtrType::new(int_comm("ptr_fs_name", 8), fs_name, Dir::In));
    let ptr_blob = b.ty(PtrType::new(int_comm("ptr_blob", 8), blob, Dir::In));
    let ptr_out_blob = b.ty(PtrType::new(int_comm("ptr_out_blob", 8), blob, Dir::Out));
    let ptr_array = b.ty(PtrType::new(int_comm("ptr_array", 8), array_int32, Dir::In));
    let ptr_pipefd = b.ty(PtrType::new(int_comm("ptr_pipefd", 8), array_fd2, Dir::Out));
    let ptr_timespec = b.ty(PtrType::new(int_comm("ptr_timespec", 8), timespec, Dir::In));
    let ptr_sockaddr = b.ty(PtrType::new(int_comm("ptr_sockaddr", 8), sockaddr, Dir::In));
    let ptr_hdr = b.ty(PtrType::new(
        CommonInfoBuilder::new()
            .name("ptr_hdr")
            .size(8)
            .align(8)
            .optional(true)
            .build(),
        hdr,
        Dir::In,
    ));
    let ptr_pkt = b.ty(PtrType::new(int_comm("ptr_pkt", 8), pkt, Dir::In));
    let len_buf = b.ty(LenType::new(int_comm("len_buf", 8), "buf", 0));
    let len_arr = b.ty(LenType::new(int_comm("len_arr", 8), "fds", 0));
    let len_addr = b.ty(LenType::new(int_comm("len_addr", 4), "addr", 0));
    let len_vma = b.ty(LenType::new(int_comm("len_vma", 8), "addr", 0));
    b.special_gen("timespec", timespec_gen);

    let calls = vec![
        SyscallBuilder::new()
            .nr(2)
            .name("open")
            .params(vec![
                Field::new("file", ptr_filename),
                Field::new("flags", open_flags),
                Field::new("mode", int32),
            ])
            .ret(fd)
            .build(),
        SyscallBuilder::new()
            .nr(0)
            .name("read")
            .params(vec![
                Field::new("fd", fd),
                Field::new("buf", ptr_out_blob),
                Field::new("count", len_buf),
            ])
            .build(),
        SyscallBuilder::new()
            .nr(1)
            .name("write")
            .params(vec![
                Field::new("fd", fd),
                Field::new("buf", ptr_blob),
                Field::new("count", len_buf),
            ])
            .build(),
        SyscallBuilder::new()
            .nr(3)
            .name("close")
            .params(vec![Field::new("fd", fd)])
            .build(),
        SyscallBuilder::new()
            .nr(32)
            .name("dup")
            .params(vec![Field::new("oldfd", fd)])
            .ret(fd)
            .build(),
        SyscallBuilder::new()
            .nr(41)
            .name("socket")
            .params(vec![
                Field::new("domain", int32_range),
                Field::new("type", int32),
                Field::new("proto", int16_aligned),
            ])
            .ret(sock)
            .build(),
        SyscallBuilder::new()
            .nr(42)
            .name("connect")
            .params(vec![
                Field::new("fd", sock),
                Field::new("addr", ptr_sockaddr),
                Field::new("addrlen", len_addr),
            ])
            .build(),
        SyscallBuilder::new()
            .nr(49)
            .name("bind$inet")
            .params(vec![
                Field::new("fd", sock),
                Field::new("port", port),
                Field::new("hdr", ptr_hdr),
            ])
            .build(),
        SyscallBuilder::new()
            .nr(22)
            .name("pipe")
            .params(vec![Field::new("fds", ptr_pipefd)])
            .build(),
        SyscallBuilder::new()
            .nr(35)
            .name("nanosleep")
            .params(vec![Field::new("req", ptr_timespec)])
            .build(),
        SyscallBuilder::new()
            .nr(9)
            .name("mmap")
            .params(vec![
                Field::new("addr", vma),
                Field::new("len", len_vma),
                Field::new("prot", mmap_prot),
                Field::new("fd", fd),
                Field::new("off", int64),
            ])
            .build(),
        SyscallBuilder::new()
            .nr(7)
            .name("poll")
            .params(vec![
                Field::new("fds", ptr_array),
                Field::new("nfds", len_arr),
                Field::new("timeout", int16),
            ])
            .build(),
        SyscallBuilder::new()
            .nr(188)
            .name("setxattr")
            .params(vec![
                Field::new("path", ptr_filename),
                Field::new("name", ptr_fs_name),
                Field::new("val", ptr_pkt),
            ])
            .build(),
        SyscallBuilder::new().nr(39).name("getpid").build(),
    ];
    for call in calls {
        b.syscall(call);
    }
    b.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn res_relations() {
        let target = test_target();
        let open = target.syscall_of_name("open").unwrap().id();
        let socket = target.syscall_of_name("socket").unwrap().id();
        let pipe = target.syscall_of_name("pipe").unwrap().id();
        let fd_producers = target.res_output_syscall("fd");
        assert!(fd_producers.contains(&open));
        assert!(fd_producers.contains(&socket));
        assert!(fd_producers.contains(&pipe));
        assert_eq!(target.res_output_syscall("sock"), &[socket]);
        let connect = target.syscall_of_name("connect").unwrap().id();
        assert_eq!(
            target.syscall_input_res(connect).to_vec(),
            vec![ResKind::from("sock")]
        );
    }

    #[test]
    fn res_compatibility() {
        let target = test_target();
        let fd = target.ty_of_name("fd").unwrap().checked_as_res();
        let sock = target.ty_of_name("sock").unwrap().checked_as_res();
        assert!(target.res_compatible(fd, "sock"));
        assert!(target.res_compatible(fd, "fd"));
        assert!(!target.res_compatible(sock, "fd"));
    }

    #[test]
    fn any_blob_added() {
        let target = test_target();
        let ty = target.ty_of(target.any_blob());
        assert_eq!(ty.name(), ANY_BLOB_NAME);
        assert!(ty.varlen());
        assert_eq!(target.syscall_of_name("bind$inet").unwrap().call_name(), "bind");
    }
}
