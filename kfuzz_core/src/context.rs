use std::fmt::Display;

use crate::{
    alloc::{Allocator, VmaAllocator},
    prog::{Call, Prog},
    select::ChoiceTable,
    target::Target,
    ty::{Dir, ResKind, TypeId, TypeKind},
    value::{ResId, Visit},
    HashMap,
};

/// A context records useful information of the calls generated so far.
///
/// Built from scratch for generation, or from a prefix of an existing prog when new
/// calls are generated for insertion or argument mutation.
#[derive(Debug, Clone)]
pub struct Context<'a> {
    /// Fuzzing target of current prog.
    pub(crate) target: &'a Target,
    /// Static priorities between syscalls.
    pub(crate) choice: &'a ChoiceTable,
    /// Dummy mem allocator.
    pub(crate) mem_allocator: Allocator,
    /// Dummy vma allocator.
    pub(crate) vma_allocator: VmaAllocator,
    /// Next avaliable resource id.
    pub(crate) next_res_id: ResId,
    /// Produced res kind, in order of appearance.
    pub(crate) res_kinds: Vec<ResKind>,
    /// Produced res kind&id mapping.
    pub(crate) res_ids: HashMap<ResKind, Vec<ResId>>,
    /// Generated strings.
    pub(crate) strs: Vec<Vec<u8>>,
    /// Generated filenames.
    pub(crate) filenames: Vec<Vec<u8>>,
    /// New calls of current context.
    pub(crate) calls: Vec<Call>,
    /// Recursion depth of optional pointers to complex types.
    pub(crate) rec_depth: HashMap<TypeId, usize>,
    /// Depth of nested producer generation.
    pub(crate) res_depth: usize,
}

impl<'a> Context<'a> {
    /// Create an empty context with `target` and `choice`.
    pub fn new(target: &'a Target, choice: &'a ChoiceTable) -> Self {
        Self {
            target,
            choice,
            mem_allocator: Allocator::new(target.mem_size()),
            vma_allocator: VmaAllocator::new(target.page_num()),
            next_res_id: 0,
            res_kinds: Vec::new(),
            res_ids: HashMap::default(),
            strs: Vec::new(),
            filenames: Vec::new(),
            calls: Vec::new(),
            rec_depth: HashMap::default(),
            res_depth: 0,
        }
    }

    /// Create a context that sees the first `upto` calls of `p`.
    ///
    /// Producers of these calls can be referred by new calls, their memory is marked as used.
    pub fn for_prog(target: &'a Target, choice: &'a ChoiceTable, p: &Prog, upto: usize) -> Self {
        let mut ctx = Self::new(target, choice);
        ctx.next_res_id = p.next_res_id();
        for call in &p.calls()[..upto] {
            ctx.note_call(call);
        }
        // memory of later calls is in use as well
        for call in &p.calls()[upto..] {
            ctx.note_mem(call);
        }
        ctx
    }

    /// Get current target of context.
    #[inline(always)]
    pub fn target(&self) -> &'a Target {
        self.target
    }

    #[inline(always)]
    pub fn choice(&self) -> &'a ChoiceTable {
        self.choice
    }

    /// Get new calls of context.
    #[inline(always)]
    pub fn calls(&self) -> &[Call] {
        &self.calls[..]
    }

    /// Get produced resource kinds of context.
    #[inline(always)]
    pub fn res(&self) -> &[ResKind] {
        &self.res_kinds
    }

    /// Get produced resource kind&id mapping of context.
    #[inline(always)]
    pub fn res_ids(&self) -> &HashMap<ResKind, Vec<ResId>> {
        &self.res_ids
    }

    #[inline(always)]
    pub fn strs(&self) -> &[Vec<u8>] {
        &self.strs
    }

    #[inline(always)]
    pub fn filenames(&self) -> &[Vec<u8>] {
        &self.filenames
    }

    /// Get mutable ref to current mem allocator.
    #[inline(always)]
    pub fn mem_allocator(&mut self) -> &mut Allocator {
        &mut self.mem_allocator
    }

    /// Get mutable ref to current vma allocator.
    #[inline(always)]
    pub fn vma_allocator(&mut self) -> &mut VmaAllocator {
        &mut self.vma_allocator
    }

    /// Append a call to context, its producers become available to later calls.
    pub fn append_call(&mut self, call: Call) {
        self.note_call(&call);
        self.calls.push(call)
    }

    /// Next avaliable resource id.
    #[inline]
    pub fn next_res_id(&mut self) -> ResId {
        let id = self.next_res_id;
        self.next_res_id += 1;
        id
    }

    /// Record a produced resource to context.
    pub fn record_res(&mut self, kind: &ResKind, id: ResId) {
        if let Some(ids) = self.res_ids.get_mut(kind) {
            ids.push(id);
        } else {
            self.res_ids.insert(kind.clone(), vec![id]);
            self.res_kinds.push(kind.clone());
        }
    }

    pub fn record_str(&mut self, val: Vec<u8>) {
        if !self.strs.contains(&val) {
            self.strs.push(val);
        }
    }

    #[allow(clippy::ptr_arg)] // binary search requires &Vec<u8>
    pub fn record_filename(&mut self, val: &Vec<u8>) -> bool {
        if let Err(idx) = self.filenames.binary_search(val) {
            self.filenames.insert(idx, val.clone());
            true
        } else {
            false
        }
    }

    /// Take new calls out of context.
    pub fn take_calls(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }

    /// Dump to prog.
    pub fn to_prog(self) -> Prog {
        Prog::new(self.calls)
    }

    fn note_call(&mut self, call: &Call) {
        let target = self.target;
        let mut produced = Vec::new();
        let mut strs = Vec::new();
        call.foreach_value(|v| {
            if let Some(r) = v.as_res() {
                if r.is_producer() {
                    produced.push((v.ty(target).checked_as_res().res_name(), r.id));
                }
            } else if let Some(d) = v.as_data() {
                if v.dir() != Dir::Out {
                    match v.ty(target).kind() {
                        TypeKind::BufferFilename => {
                            let name = d.data.split(|&b| b == 0).next().unwrap_or(&[]);
                            if !name.is_empty() {
                                strs.push((true, name.to_vec()));
                            }
                        }
                        TypeKind::BufferString => strs.push((false, d.data.clone())),
                        _ => (),
                    }
                }
            }
            Visit::Continue
        });
        for (kind, id) in produced {
            self.record_res(kind, id);
        }
        for (is_filename, s) in strs {
            if is_filename {
                self.record_filename(&s);
            } else {
                self.record_str(s);
            }
        }
        self.note_mem(call);
    }

    fn note_mem(&mut self, call: &Call) {
        let target = self.target;
        let mut mem = Vec::new();
        let mut vma = Vec::new();
        call.foreach_value(|v| {
            if let Some(p) = v.as_ptr() {
                if let Some(pointee) = p.pointee.as_ref() {
                    mem.push((p.addr, pointee.size(target)));
                }
            } else if let Some(m) = v.as_vma() {
                if !m.is_special() {
                    vma.push((m.addr / target.page_sz(), m.vma_size / target.page_sz()));
                }
            }
            Visit::Continue
        });
        for (addr, sz) in mem {
            self.mem_allocator.note_alloc(addr, sz);
        }
        for (page, num) in vma {
            self.vma_allocator.note_alloc(page, num);
        }
    }
}

impl<'a> Display for Context<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "target: {}", self.target.target_name())?;
        writeln!(f, "res num: {}", self.next_res_id)?;
        writeln!(f, "res:")?;
        for kind in &self.res_kinds {
            writeln!(f, "\t{}: {:?}", kind, self.res_ids[kind])?;
        }
        writeln!(f, "str:")?;
        for val in &self.strs {
            writeln!(f, "\t{:?}", val)?;
        }
        writeln!(f, "filenames:")?;
        for fname in &self.filenames {
            writeln!(f, "\t{:?}", fname)?;
        }
        writeln!(f, "calls:")?;
        for call in &self.calls {
            writeln!(f, "{}", call.display(self.target))?
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse::parse_prog, target::test_target};

    #[test]
    fn for_prog_sees_prefix_producers() {
        let target = test_target();
        let ct = ChoiceTable::new(&target, None);
        let p = parse_prog(
            &target,
            "r0 = open(&(0x20000000)='./file0\\x00', 0x2, 0x0)\nr1 = socket(0x2, 0x1, 0x0)\nclose(r1)\n",
        )
        .unwrap();
        let ctx = Context::for_prog(&target, &ct, &p, 1);
        assert_eq!(ctx.res().to_vec(), vec![ResKind::from("fd")]);
        assert_eq!(ctx.filenames().to_vec(), vec![b"./file0".to_vec()]);
        assert_eq!(ctx.next_res_id, p.next_res_id());
        let ctx = Context::for_prog(&target, &ct, &p, 2);
        assert_eq!(ctx.res().len(), 2);
    }
}
