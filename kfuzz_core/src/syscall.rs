//! Syscall descriptions.

use crate::ty::{Field, TypeId};
use std::fmt::Display;

pub type SyscallId = usize;
pub const MAX_PARAMS_NUM: usize = 9;

#[derive(Debug, Clone)]
pub struct Syscall {
    /// Unique id of each declared syscall, also its index in the target.
    id: SyscallId,
    /// Kernel call number.
    nr: u64,
    /// Name of the variant, such as `openat$dir`.
    name: Box<str>,
    /// Kernel call name, such as `openat`.
    call_name: Box<str>,
    params: Box<[Field]>,
    ret: Option<TypeId>,
    disabled: bool,
}

impl Display for Syscall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            write!(f, "{}", param.name())?;
            if i != self.params.len() - 1 {
                write!(f, ", ")?;
            }
        }
        write!(f, ")")
    }
}

impl Syscall {
    #[inline(always)]
    pub fn id(&self) -> SyscallId {
        self.id
    }

    #[inline(always)]
    pub fn nr(&self) -> u64 {
        self.nr
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    pub fn call_name(&self) -> &str {
        &self.call_name
    }

    #[inline(always)]
    pub fn params(&self) -> &[Field] {
        &self.params
    }

    /// Resource type of the return value, if the call returns one.
    #[inline(always)]
    pub fn ret(&self) -> Option<TypeId> {
        self.ret
    }

    #[inline(always)]
    pub fn disabled(&self) -> bool {
        self.disabled
    }

    pub(crate) fn set_id(&mut self, id: SyscallId) {
        self.id = id;
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyscallBuilder {
    nr: u64,
    name: String,
    call_name: Option<String>,
    params: Vec<Field>,
    ret: Option<TypeId>,
    disabled: bool,
}

impl SyscallBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nr(&mut self, nr: u64) -> &mut Self {
        self.nr = nr;
        self
    }

    pub fn name<T: Into<String>>(&mut self, name: T) -> &mut Self {
        self.name = name.into();
        self
    }

    pub fn call_name<T: Into<String>>(&mut self, call_name: T) -> &mut Self {
        self.call_name = Some(call_name.into());
        self
    }

    pub fn param(&mut self, param: Field) -> &mut Self {
        self.params.push(param);
        self
    }

    pub fn params(&mut self, params: Vec<Field>) -> &mut Self {
        self.params = params;
        self
    }

    pub fn ret(&mut self, ret: TypeId) -> &mut Self {
        self.ret = Some(ret);
        self
    }

    pub fn disabled(&mut self, disabled: bool) -> &mut Self {
        self.disabled = disabled;
        self
    }

    pub fn build(&self) -> Syscall {
        assert!(
            self.params.len() <= MAX_PARAMS_NUM,
            "too many params: {}",
            self.name
        );
        let call_name = self.call_name.clone().unwrap_or_else(|| {
            match self.name.find('$') {
                Some(idx) => self.name[..idx].to_string(),
                None => self.name.clone(),
            }
        });
        Syscall {
            id: SyscallId::MAX,
            nr: self.nr,
            name: self.name.clone().into_boxed_str(),
            call_name: call_name.into_boxed_str(),
            params: self.params.clone().into_boxed_slice(),
            ret: self.ret,
            disabled: self.disabled,
        }
    }
}
