//! Program: a sequence of calls plus the producer-consumer graph of their results.

use crate::{
    syscall::SyscallId,
    target::Target,
    ty::{Dir, Type, TypeKind},
    value::{
        foreach_value, foreach_value_mut, nth_value_mut, ResId, Value, ValueKind, Visit,
    },
    HashMap, HashSet,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    sid: SyscallId,
    args: Vec<Value>,
    ret: Option<Value>,
}

impl Call {
    #[inline(always)]
    pub fn sid(&self) -> SyscallId {
        self.sid
    }

    #[inline(always)]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    #[inline(always)]
    pub fn args_mut(&mut self) -> &mut [Value] {
        &mut self.args
    }

    #[inline(always)]
    pub fn ret(&self) -> Option<&Value> {
        self.ret.as_ref()
    }

    #[inline(always)]
    pub fn display<'a, 'b>(&'a self, target: &'b Target) -> CallDisplay<'a, 'b> {
        CallDisplay {
            call: self,
            target,
            names: None,
        }
    }

    /// Pre-order traversal of the return value and all arguments, returns true if stopped.
    pub fn foreach_value<'a, F>(&'a self, mut f: F) -> bool
    where
        F: FnMut(&'a Value) -> Visit,
    {
        if let Some(ret) = self.ret.as_ref() {
            if foreach_value(ret, &mut f) {
                return true;
            }
        }
        for arg in self.args.iter() {
            if foreach_value(arg, &mut f) {
                return true;
            }
        }
        false
    }

    pub fn foreach_value_mut<F>(&mut self, mut f: F) -> bool
    where
        F: FnMut(&mut Value) -> Visit,
    {
        if let Some(ret) = self.ret.as_mut() {
            if foreach_value_mut(ret, &mut f) {
                return true;
            }
        }
        for arg in self.args.iter_mut() {
            if foreach_value_mut(arg, &mut f) {
                return true;
            }
        }
        false
    }

    /// Ids of result values this call produces.
    pub fn produced_res(&self) -> Vec<ResId> {
        let mut ids = Vec::new();
        self.foreach_value(|v| {
            if let Some(r) = v.as_res() {
                if r.is_producer() {
                    ids.push(r.id);
                }
            }
            Visit::Continue
        });
        ids
    }

    /// (consumer, producer) edges of this call.
    pub fn consumed_res(&self) -> Vec<(ResId, ResId)> {
        let mut edges = Vec::new();
        self.foreach_value(|v| {
            if let Some(r) = v.as_res() {
                if let Some(src) = r.src {
                    edges.push((r.id, src));
                }
            }
            Visit::Continue
        });
        edges
    }

    fn sever(&mut self, ids: &HashSet<ResId>) {
        self.foreach_value_mut(|v| {
            if let Some(r) = v.as_res_mut() {
                if let Some(src) = r.src {
                    if ids.contains(&src) {
                        r.src = None;
                    }
                }
            }
            Visit::Continue
        });
    }
}

pub struct CallDisplay<'a, 'b> {
    call: &'a Call,
    target: &'b Target,
    names: Option<&'b HashMap<ResId, usize>>,
}

impl<'a, 'b> std::fmt::Display for CallDisplay<'a, 'b> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let syscall = self.target.syscall_of(self.call.sid);
        if let (Some(ret), Some(names)) = (self.call.ret.as_ref(), self.names) {
            let ret = ret.checked_as_res();
            if let Some(name) = names.get(&ret.id) {
                write!(f, "r{} = ", name)?;
            }
        }
        write!(f, "{}(", syscall.name())?;
        for (i, arg) in self.call.args.iter().enumerate() {
            match self.names {
                Some(names) => write!(f, "{}", arg.display_with(self.target, names))?,
                None => write!(f, "{}", arg.display(self.target))?,
            }
            if i != self.call.args.len() - 1 {
                write!(f, ", ")?;
            }
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone)]
pub struct CallBuilder {
    sid: SyscallId,
    args: Vec<Value>,
    ret: Option<Value>,
}

impl CallBuilder {
    pub fn new(sid: SyscallId) -> Self {
        Self {
            sid,
            args: Vec::new(),
            ret: None,
        }
    }

    pub fn arg(&mut self, arg: Value) -> &mut Self {
        self.args.push(arg);
        self
    }

    pub fn args<T: IntoIterator<Item = Value>>(&mut self, args: T) -> &mut Self {
        self.args.extend(args);
        self
    }

    pub fn ret(&mut self, ret: Option<Value>) -> &mut Self {
        self.ret = ret;
        self
    }

    pub fn build(&mut self) -> Call {
        let mut args = std::mem::take(&mut self.args);
        args.shrink_to_fit();
        Call {
            sid: self.sid,
            args,
            ret: self.ret.take(),
        }
    }
}

/// Sequence of calls, with the consumers of each produced result.
///
/// Consumers only refer to results produced by earlier calls. Every operation that
/// changes calls keeps `uses` in sync, consumers whose producer goes away are severed
/// and pass their plain value instead.
#[derive(Debug, Clone, Default)]
pub struct Prog {
    calls: Vec<Call>,
    uses: HashMap<ResId, HashSet<ResId>>,
    next_res_id: ResId,
}

impl PartialEq for Prog {
    fn eq(&self, other: &Self) -> bool {
        self.calls == other.calls
    }
}

impl Prog {
    /// Build a prog from `calls`, dangling consumers are severed.
    pub fn new(calls: Vec<Call>) -> Self {
        let mut p = Prog {
            calls,
            uses: HashMap::default(),
            next_res_id: 0,
        };
        let mut produced = HashSet::new();
        let mut max_id = None;
        for call in p.calls.iter_mut() {
            let mut dangling = HashSet::new();
            for (consumer, src) in call.consumed_res() {
                if produced.contains(&src) {
                    p.uses.entry(src).or_default().insert(consumer);
                } else {
                    dangling.insert(src);
                }
            }
            if !dangling.is_empty() {
                call.sever(&dangling);
            }
            call.foreach_value(|v| {
                if let Some(r) = v.as_res() {
                    max_id = max_id.max(Some(r.id));
                }
                Visit::Continue
            });
            produced.extend(call.produced_res());
        }
        p.next_res_id = max_id.map(|id| id + 1).unwrap_or(0);
        p
    }

    #[inline(always)]
    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Consumers of `producer`.
    pub fn uses(&self, producer: ResId) -> Option<&HashSet<ResId>> {
        self.uses.get(&producer)
    }

    #[inline(always)]
    pub fn next_res_id(&self) -> ResId {
        self.next_res_id
    }

    #[inline(always)]
    pub fn display<'a, 'b>(&'a self, target: &'b Target) -> ProgDisplay<'a, 'b> {
        ProgDisplay { prog: self, target }
    }

    /// Insert `calls` before `idx`.
    ///
    /// Consumers of `calls` may refer to producers before `idx` or to producers of
    /// earlier calls in `calls`.
    pub fn insert_calls(&mut self, idx: usize, calls: Vec<Call>) {
        assert!(idx <= self.calls.len());
        let mut next = self.next_res_id;
        for call in calls.iter() {
            for (consumer, src) in call.consumed_res() {
                self.uses.entry(src).or_default().insert(consumer);
            }
            call.foreach_value(|v| {
                if let Some(r) = v.as_res() {
                    next = next.max(r.id + 1);
                }
                Visit::Continue
            });
        }
        self.next_res_id = next;
        let tail = self.calls.split_off(idx);
        self.calls.extend(calls);
        self.calls.extend(tail);
    }

    /// Insert all calls of `other` before `idx`, renumbering its results.
    pub fn splice(&mut self, idx: usize, mut other: Prog) {
        let base = self.next_res_id;
        for call in other.calls.iter_mut() {
            call.foreach_value_mut(|v| {
                if let Some(r) = v.as_res_mut() {
                    r.id += base;
                    if let Some(src) = r.src.as_mut() {
                        *src += base;
                    }
                }
                Visit::Continue
            });
        }
        self.insert_calls(idx, other.calls);
    }

    pub fn remove_call(&self, i: usize) -> Prog {
        let mut new_p = self.clone();
        new_p.remove_call_inplace(i);
        new_p
    }

    pub fn remove_call_inplace(&mut self, i: usize) -> Call {
        let removed = self.calls.remove(i);
        for (consumer, src) in removed.consumed_res() {
            self.unlink(consumer, src);
        }
        let produced = removed
            .produced_res()
            .into_iter()
            .filter(|id| self.uses.remove(id).is_some())
            .collect::<HashSet<_>>();
        if !produced.is_empty() {
            for c in &mut self.calls[i..] {
                c.sever(&produced);
            }
        }
        removed
    }

    /// Edit the `i`-th call in place, then reconcile the result graph with the new args.
    pub fn edit_call<F, R>(&mut self, i: usize, f: F) -> R
    where
        F: FnOnce(&mut Call) -> R,
    {
        let old_produced = self.calls[i].produced_res();
        let old_edges = self.calls[i].consumed_res();
        let ret = f(&mut self.calls[i]);
        let new_produced = self.calls[i].produced_res().into_iter().collect::<HashSet<_>>();
        let new_edges = self.calls[i].consumed_res();

        for (consumer, src) in old_edges {
            self.unlink(consumer, src);
        }
        for (consumer, src) in new_edges {
            self.uses.entry(src).or_default().insert(consumer);
        }
        let gone = old_produced
            .into_iter()
            .filter(|id| !new_produced.contains(id))
            .filter(|id| self.uses.remove(id).is_some())
            .collect::<HashSet<_>>();
        if !gone.is_empty() {
            for c in &mut self.calls[i + 1..] {
                c.sever(&gone);
            }
        }
        let mut next = self.next_res_id;
        self.calls[i].foreach_value(|v| {
            if let Some(r) = v.as_res() {
                next = next.max(r.id + 1);
            }
            Visit::Continue
        });
        self.next_res_id = next;
        ret
    }

    /// Replace the `nth` value of call `i` with `new`.
    ///
    /// Replacing a producer with another producer keeps the consumers of the old one.
    pub fn replace_arg(&mut self, i: usize, nth: usize, mut new: Value) {
        self.edit_call(i, |call| {
            let slot = match nth_value_mut(&mut call.args, nth) {
                Some(slot) => slot,
                None => panic!("value {} out of range", nth),
            };
            if let (Some(old), Some(new)) = (slot.as_res(), new.as_res_mut()) {
                if old.is_producer() && new.is_producer() {
                    new.id = old.id;
                }
            }
            *slot = new;
        })
    }

    fn unlink(&mut self, consumer: ResId, src: ResId) {
        if let Some(consumers) = self.uses.get_mut(&src) {
            consumers.remove(&consumer);
            if consumers.is_empty() {
                self.uses.remove(&src);
            }
        }
    }

    /// Names of used producers, numbered in order of appearance.
    fn res_names(&self) -> HashMap<ResId, usize> {
        let mut names = HashMap::default();
        for call in self.calls.iter() {
            call.foreach_value(|v| {
                if let Some(r) = v.as_res() {
                    if r.is_producer() && self.uses.contains_key(&r.id) {
                        let n = names.len();
                        names.insert(r.id, n);
                    }
                }
                Visit::Continue
            });
        }
        names
    }

    /// Panic if the prog is broken.
    pub fn validate(&self, target: &Target) {
        if let Err(e) = self.check(target) {
            panic!("invalid prog: {}\n{}", e, self.display(target));
        }
    }

    #[cfg(debug_assertions)]
    #[inline]
    pub fn debug_validate(&self, target: &Target) {
        self.validate(target)
    }

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    pub fn debug_validate(&self, _target: &Target) {}

    /// Check structural invariants of the prog.
    pub fn check(&self, target: &Target) -> Result<(), String> {
        let mut produced: HashSet<ResId> = HashSet::new();
        let mut seen: HashSet<ResId> = HashSet::new();
        let mut uses: HashMap<ResId, HashSet<ResId>> = HashMap::default();
        for (i, call) in self.calls.iter().enumerate() {
            if call.sid >= target.all_syscalls().len() {
                return Err(format!("call {}: bad syscall id {}", i, call.sid));
            }
            let syscall = target.syscall_of(call.sid);
            if call.args.len() != syscall.params().len() {
                return Err(format!(
                    "call {} {}: want {} args, got {}",
                    i,
                    syscall.name(),
                    syscall.params().len(),
                    call.args.len()
                ));
            }
            match (syscall.ret(), call.ret.as_ref()) {
                (Some(tid), Some(ret)) => {
                    if ret.ty_id() != tid || ret.kind() != ValueKind::Res || ret.dir() != Dir::Out {
                        return Err(format!("call {} {}: bad return value", i, syscall.name()));
                    }
                }
                (None, None) => (),
                _ => return Err(format!("call {} {}: bad return value", i, syscall.name())),
            }
            for (field, arg) in syscall.params().iter().zip(call.args.iter()) {
                if arg.ty_id() != field.ty() {
                    return Err(format!(
                        "call {} {}: arg {} has type {}",
                        i,
                        syscall.name(),
                        field.name(),
                        arg.ty(target)
                    ));
                }
                check_value(target, arg).map_err(|e| {
                    format!("call {} {}: arg {}: {}", i, syscall.name(), field.name(), e)
                })?;
            }
            let mut err = None;
            call.foreach_value(|v| {
                if let Some(r) = v.as_res() {
                    if !seen.insert(r.id) {
                        err = Some(format!("call {}: duplicate result id {}", i, r.id));
                        return Visit::Stop;
                    }
                    if let Some(src) = r.src {
                        if !produced.contains(&src) {
                            err = Some(format!("call {}: r{} uses unknown producer r{}", i, r.id, src));
                            return Visit::Stop;
                        }
                        uses.entry(src).or_default().insert(r.id);
                    }
                    if r.id >= self.next_res_id {
                        err = Some(format!("call {}: result id {} out of range", i, r.id));
                        return Visit::Stop;
                    }
                }
                Visit::Continue
            });
            if let Some(e) = err {
                return Err(e);
            }
            produced.extend(call.produced_res());
        }
        if uses != self.uses {
            return Err(format!("stale uses: {:?} != {:?}", self.uses, uses));
        }
        Ok(())
    }
}

fn check_value(target: &Target, val: &Value) -> Result<(), String> {
    let ty = val.ty(target);
    let expected = match ty.kind() {
        TypeKind::Res => ValueKind::Res,
        TypeKind::Const
        | TypeKind::Int
        | TypeKind::Flags
        | TypeKind::Len
        | TypeKind::Proc
        | TypeKind::Csum => ValueKind::Integer,
        TypeKind::Vma => {
            if val.kind() == ValueKind::Vma {
                let v = val.checked_as_vma();
                if v.is_special() && v.addr >= target.special_ptrs().len() as u64 {
                    return Err(format!("bad special pointer index {}", v.addr));
                }
            }
            ValueKind::Vma
        }
        TypeKind::BufferBlob | TypeKind::BufferString | TypeKind::BufferFilename => {
            ValueKind::Data
        }
        TypeKind::Array | TypeKind::Struct => ValueKind::Group,
        TypeKind::Ptr => ValueKind::Ptr,
        TypeKind::Union => ValueKind::Union,
    };
    if val.kind() != expected {
        return Err(format!("{} holds {:?} value", ty, val.kind()));
    }
    match ty.kind() {
        TypeKind::Const => {
            let v = val.checked_as_int();
            if v.val != ty.checked_as_const().const_val() {
                return Err(format!("{} holds {:#x}", ty, v.val));
            }
        }
        TypeKind::BufferBlob | TypeKind::BufferString | TypeKind::BufferFilename => {
            check_data(target, ty, val)?;
        }
        TypeKind::Ptr => {
            let v = val.checked_as_ptr();
            let ptr_ty = ty.checked_as_ptr();
            match v.pointee.as_ref() {
                Some(pointee) => {
                    let elem = target.ty_of(ptr_ty.elem());
                    let squashed = pointee.ty_id() == target.any_blob() && elem.is_complex();
                    if pointee.ty_id() != elem.id() && !squashed {
                        return Err(format!("{} points to {}", ty, pointee.ty(target)));
                    }
                    if v.addr + pointee.size(target) > target.mem_size() {
                        return Err(format!("{} points out of data area: {:#x}", ty, v.addr));
                    }
                    check_value(target, pointee)?;
                }
                None => {
                    if v.addr >= target.special_ptrs().len() as u64 {
                        return Err(format!("bad special pointer index {}", v.addr));
                    }
                }
            }
        }
        TypeKind::Array => {
            let v = val.checked_as_group();
            let arr = ty.checked_as_array();
            if let Some(range) = arr.range() {
                if !range.contains(&(v.inner.len() as u64)) {
                    return Err(format!("{} has {} elements", ty, v.inner.len()));
                }
            }
            for e in v.inner.iter() {
                if e.ty_id() != arr.elem() {
                    return Err(format!("{} holds {}", ty, e.ty(target)));
                }
                check_value(target, e)?;
            }
        }
        TypeKind::Struct => {
            let v = val.checked_as_group();
            let st = ty.checked_as_struct();
            if v.inner.len() != st.fields().len() {
                return Err(format!("{} has {} fields", ty, v.inner.len()));
            }
            for (f, e) in st.fields().iter().zip(v.inner.iter()) {
                if e.ty_id() != f.ty() {
                    return Err(format!("{}.{} holds {}", ty, f.name(), e.ty(target)));
                }
                check_value(target, e)?;
            }
        }
        TypeKind::Union => {
            let v = val.checked_as_union();
            let un = ty.checked_as_union();
            let field = un
                .fields()
                .get(v.index as usize)
                .ok_or_else(|| format!("{} has no option {}", ty, v.index))?;
            if v.option.ty_id() != field.ty() {
                return Err(format!("{}.{} holds {}", ty, field.name(), v.option.ty(target)));
            }
            check_value(target, &v.option)?;
        }
        _ => (),
    }
    Ok(())
}

fn check_data(target: &Target, ty: &Type, val: &Value) -> Result<(), String> {
    let v = val.checked_as_data();
    let len = v.size(target);
    if !ty.varlen() && len != ty.size() {
        return Err(format!("{} holds {} bytes", ty, len));
    }
    if let Some(range) = ty.as_buffer_blob().and_then(|b| b.range()) {
        if !range.contains(&len) {
            return Err(format!("{} holds {} bytes", ty, len));
        }
    }
    if val.dir() == Dir::Out && !v.data.is_empty() {
        return Err(format!("output {} carries data", ty));
    }
    Ok(())
}

pub struct ProgDisplay<'a, 'b> {
    prog: &'a Prog,
    target: &'b Target,
}

impl<'a, 'b> std::fmt::Display for ProgDisplay<'a, 'b> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = self.prog.res_names();
        for call in &self.prog.calls {
            let display = CallDisplay {
                call,
                target: self.target,
                names: Some(&names),
            };
            writeln!(f, "{}", display)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gen::gen_prog, parse::parse_prog, select::ChoiceTable, target::test_target,
    };
    use rand::{rngs::SmallRng, SeedableRng};

    const PROG: &str = "r0 = open(&(0x20000000)='./file0\\x00', 0x2, 0x0)\n\
                        r1 = dup(r0)\n\
                        write(r1, &(0x20000040)=\"deadbeef\", 0x4)\n\
                        close(r0)\n";

    #[test]
    fn uses_tracked_on_parse() {
        let target = test_target();
        let p = parse_prog(&target, PROG).unwrap();
        p.validate(&target);
        let open_ret = p.calls()[0].ret().unwrap().checked_as_res().id;
        assert_eq!(p.uses(open_ret).unwrap().len(), 2);
    }

    #[test]
    fn remove_producer_severs_consumers() {
        let target = test_target();
        let mut p = parse_prog(&target, PROG).unwrap();
        p.remove_call_inplace(0);
        p.validate(&target);
        assert_eq!(p.len(), 3);
        let dup_arg = p.calls()[0].args()[0].checked_as_res();
        assert!(dup_arg.src.is_none());
        let close_arg = p.calls()[2].args()[0].checked_as_res();
        assert!(close_arg.src.is_none());
        // write still uses the result of dup
        let write_arg = p.calls()[1].args()[0].checked_as_res();
        assert!(write_arg.src.is_some());
    }

    #[test]
    fn remove_consumer_keeps_producer() {
        let target = test_target();
        let p = parse_prog(&target, PROG).unwrap();
        let p1 = p.remove_call(3);
        p1.validate(&target);
        let open_ret = p1.calls()[0].ret().unwrap().checked_as_res().id;
        assert_eq!(p1.uses(open_ret).unwrap().len(), 1);
        // the original is untouched
        assert_eq!(p.len(), 4);
        p.validate(&target);
    }

    #[test]
    fn clone_is_independent() {
        let target = test_target();
        let p = parse_prog(&target, PROG).unwrap();
        let mut p1 = p.clone();
        p1.remove_call_inplace(1);
        p.validate(&target);
        p1.validate(&target);
        assert_eq!(p.display(&target).to_string(), PROG);
    }

    #[test]
    fn edit_call_reconciles_uses() {
        let target = test_target();
        let mut p = parse_prog(&target, PROG).unwrap();
        // turn the dup into a plain value, its result loses the producer
        p.edit_call(1, |call| {
            let r = call.args_mut()[0].checked_as_res_mut();
            r.src = None;
        });
        p.validate(&target);
        let open_ret = p.calls()[0].ret().unwrap().checked_as_res().id;
        assert_eq!(p.uses(open_ret).unwrap().len(), 1);
    }

    #[test]
    fn splice_renumbers() {
        let target = test_target();
        let mut p = parse_prog(&target, PROG).unwrap();
        let other = parse_prog(&target, PROG).unwrap();
        p.splice(2, other);
        p.validate(&target);
        assert_eq!(p.len(), 8);
    }

    #[test]
    fn generated_progs_are_valid() {
        let target = test_target();
        let ct = ChoiceTable::new(&target, None);
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..64 {
            let p = gen_prog(&target, &ct, &mut rng, 16);
            p.validate(&target);
            let mut p1 = p.clone();
            while !p1.is_empty() {
                p1.remove_call_inplace(0);
                p1.validate(&target);
            }
        }
    }
}
