//! Prog parse.
//!
//! Inverse of `Prog::display`: results are named `rN`, producers referred by later
//! calls are marked as `<rN=>`, pointers show the address seen by the kernel.
use crate::{
    prog::{CallBuilder, Prog},
    syscall::Syscall,
    target::Target,
    ty::{Dir, TypeId, TypeKind},
    value::{
        DataValue, GroupValue, IntegerValue, PtrValue, ResId, ResValue, UnionValue, Value,
        VmaValue,
    },
    HashMap,
};
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

#[derive(Parser)]
#[grammar = "parse/prog_syntax.pest"]
pub struct SyntaxParser;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("syntax: {0}")]
    Syntax(Box<pest::error::Error<Rule>>),
    #[error("{line}:{col} `{text}`: {kind}")]
    Value {
        line: usize,
        col: usize,
        text: String,
        kind: ValueError,
    },
    #[error("no calls")]
    NoCalls,
    #[error("invalid prog: {0}")]
    Invalid(String),
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(e: pest::error::Error<Rule>) -> Self {
        ParseError::Syntax(Box::new(e))
    }
}

#[derive(Debug, Error)]
pub enum ValueError {
    #[error("call not exists")]
    CallNotExists,
    #[error("want {expected} args, got {got}")]
    ArgCount { expected: usize, got: usize },
    #[error("call has no result")]
    NoResult,
    #[error("{0} does not take this value")]
    Mismatch(String),
    #[error("bad number: {0}")]
    Number(#[from] std::num::ParseIntError),
    #[error("bad hex data: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("bad escape sequence")]
    Escape,
    #[error("unknown result")]
    UnknownRes,
    #[error("duplicate result name")]
    DuplicateRes,
    #[error("address out of data area")]
    Address,
    #[error("not a special pointer")]
    SpecialPtr,
    #[error("no such option")]
    NoOption,
}

type Node<'a> = pest::iterators::Pair<'a, Rule>;

fn value_err(node: &Node, kind: ValueError) -> ParseError {
    let (line, col) = node.as_span().start_pos().line_col();
    ParseError::Value {
        line,
        col,
        text: node.as_str().to_string(),
        kind,
    }
}

/// Parse the text form of a prog.
pub fn parse_prog(target: &Target, p: &str) -> Result<Prog, ParseError> {
    let nodes = SyntaxParser::parse(Rule::Prog, p)?
        .next()
        .map(|n| n.into_inner())
        .ok_or(ParseError::NoCalls)?;
    let mut conv = Converter {
        target,
        names: HashMap::default(),
        next_id: 0,
    };
    let mut calls = Vec::new();
    for node in nodes.filter(|n| n.as_rule() == Rule::Call) {
        calls.push(conv.call(node)?);
    }
    if calls.is_empty() {
        return Err(ParseError::NoCalls);
    }
    let p = Prog::new(calls);
    p.check(target).map_err(ParseError::Invalid)?;
    Ok(p)
}

struct Converter<'t> {
    target: &'t Target,
    /// `rN` to result id.
    names: HashMap<u64, ResId>,
    next_id: ResId,
}

impl<'t> Converter<'t> {
    fn fresh_id(&mut self) -> ResId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn call(&mut self, node: Node) -> Result<crate::prog::Call, ParseError> {
        let mut nodes = node.into_inner().peekable();
        let mut ret_name = None;
        if let Some(n) = nodes.peek() {
            if n.as_rule() == Rule::ResName {
                ret_name = Some((res_name(n)?, n.clone()));
                nodes.next();
            }
        }
        let name_node = match nodes.next() {
            Some(n) => n,
            None => return Err(ParseError::NoCalls),
        };
        let syscall = self.syscall(&name_node)?;
        let arg_nodes = nodes.collect::<Vec<_>>();
        if arg_nodes.len() != syscall.params().len() {
            return Err(value_err(
                &name_node,
                ValueError::ArgCount {
                    expected: syscall.params().len(),
                    got: arg_nodes.len(),
                },
            ));
        }
        let mut args = Vec::with_capacity(arg_nodes.len());
        for (param, node) in syscall.params().iter().zip(arg_nodes) {
            args.push(self.value(node, param.ty(), param.dir_or(Dir::In))?);
        }

        let ret = match (syscall.ret(), ret_name) {
            (Some(tid), name) => {
                let id = self.fresh_id();
                if let Some((n, node)) = name {
                    if self.names.insert(n, id).is_some() {
                        return Err(value_err(&node, ValueError::DuplicateRes));
                    }
                }
                let val = self.target.ty_of(tid).checked_as_res().default_val();
                Some(ResValue::new_res(tid, id, val).into())
            }
            (None, Some((_, node))) => return Err(value_err(&node, ValueError::NoResult)),
            (None, None) => None,
        };
        Ok(CallBuilder::new(syscall.id()).args(args).ret(ret).build())
    }

    fn syscall(&self, node: &Node) -> Result<&'t Syscall, ParseError> {
        self.target
            .syscall_of_name(node.as_str())
            .ok_or_else(|| value_err(node, ValueError::CallNotExists))
    }

    fn value(&mut self, node: Node, tid: TypeId, dir: Dir) -> Result<Value, ParseError> {
        let ty = self.target.ty_of(tid);
        let mismatch = |node: &Node| value_err(node, ValueError::Mismatch(ty.to_string()));
        match (node.as_rule(), ty.kind()) {
            (Rule::Number, kind) => {
                let n = number(&node)?;
                match kind {
                    TypeKind::Const
                    | TypeKind::Int
                    | TypeKind::Flags
                    | TypeKind::Len
                    | TypeKind::Proc
                    | TypeKind::Csum => Ok(IntegerValue::new(tid, dir, n).into()),
                    TypeKind::Res => Ok(ResValue::new_null(tid, dir, self.fresh_id(), n).into()),
                    TypeKind::Ptr => {
                        let idx = self.special_ptr(&node, n)?;
                        Ok(PtrValue::new_special(tid, dir, idx).into())
                    }
                    TypeKind::Vma => {
                        let idx = self.special_ptr(&node, n)?;
                        Ok(VmaValue::new_special(tid, dir, idx).into())
                    }
                    _ => Err(mismatch(&node)),
                }
            }
            (Rule::Res, TypeKind::Res) => self.res(node, tid, dir),
            (Rule::Ptr, TypeKind::Ptr) => {
                let span_node = node.clone();
                let mut inner = node.into_inner();
                let addr = self.addr(next(&mut inner, &span_node)?)?;
                let pointee_node = next(&mut inner, &span_node)?;
                let ptr_ty = ty.checked_as_ptr();
                let elem = self.target.ty_of(ptr_ty.elem());
                let pointee = match pointee_node.as_rule() {
                    Rule::Nil => return Err(mismatch(&pointee_node)),
                    Rule::Data if elem.is_complex() => {
                        self.data(pointee_node, self.target.any_blob(), ptr_ty.dir())?
                    }
                    _ => self.value(pointee_node, elem.id(), ptr_ty.dir())?,
                };
                Ok(PtrValue::new(tid, dir, addr, pointee).into())
            }
            (Rule::Vma, TypeKind::Vma) => {
                let span_node = node.clone();
                let mut inner = node.into_inner();
                let addr = self.addr(next(&mut inner, &span_node)?)?;
                let size_node = next(&mut inner, &span_node)?;
                let size = number(&size_node)?;
                if size == 0 {
                    return Err(mismatch(&size_node));
                }
                Ok(VmaValue::new(tid, dir, addr, size).into())
            }
            (Rule::Data, TypeKind::BufferBlob)
            | (Rule::Data, TypeKind::BufferString)
            | (Rule::Data, TypeKind::BufferFilename) => self.data(node, tid, dir),
            (Rule::Struct, TypeKind::Struct) => {
                let fields = ty.checked_as_struct().fields();
                let nodes = node.clone().into_inner().collect::<Vec<_>>();
                if nodes.len() != fields.len() {
                    return Err(mismatch(&node));
                }
                let mut vals = Vec::with_capacity(fields.len());
                for (f, n) in fields.iter().zip(nodes) {
                    vals.push(self.value(n, f.ty(), f.dir_or(dir))?);
                }
                Ok(GroupValue::new(tid, dir, vals).into())
            }
            (Rule::Array, TypeKind::Array) => {
                let elem = ty.checked_as_array().elem();
                let mut vals = Vec::new();
                for n in node.into_inner() {
                    vals.push(self.value(n, elem, dir)?);
                }
                Ok(GroupValue::new(tid, dir, vals).into())
            }
            (Rule::Union, TypeKind::Union) => {
                let span_node = node.clone();
                let mut inner = node.into_inner();
                let name = next(&mut inner, &span_node)?;
                let un = ty.checked_as_union();
                let idx = un
                    .field_index(name.as_str())
                    .ok_or_else(|| value_err(&name, ValueError::NoOption))?;
                let field = &un.fields()[idx];
                let option = self.value(next(&mut inner, &span_node)?, field.ty(), field.dir_or(dir))?;
                Ok(UnionValue::new(tid, dir, idx as u64, option).into())
            }
            _ => Err(mismatch(&node)),
        }
    }

    fn res(&mut self, node: Node, tid: TypeId, dir: Dir) -> Result<Value, ParseError> {
        let id = self.fresh_id();
        let mut def = None;
        let mut val = None;
        for n in node.clone().into_inner() {
            match n.as_rule() {
                Rule::ResDef => {
                    if dir == Dir::In {
                        return Err(value_err(&n, ValueError::Mismatch("input result".into())));
                    }
                    let name = n.clone().into_inner().next().map(|r| res_name(&r)).transpose()?;
                    def = name.map(|name| (name, n));
                }
                Rule::ResName => {
                    let name = res_name(&n)?;
                    let src = *self
                        .names
                        .get(&name)
                        .ok_or_else(|| value_err(&n, ValueError::UnknownRes))?;
                    let default = self.target.ty_of(tid).checked_as_res().default_val();
                    let mut r = ResValue::new_ref(tid, dir, id, src);
                    r.val = default;
                    val = Some(r);
                }
                Rule::Number => val = Some(ResValue::new_null(tid, dir, id, number(&n)?)),
                _ => return Err(value_err(&n, ValueError::Mismatch("result".into()))),
            }
        }
        if let Some((name, n)) = def {
            if self.names.insert(name, id).is_some() {
                return Err(value_err(&n, ValueError::DuplicateRes));
            }
        }
        match val {
            Some(v) => Ok(v.into()),
            None => Err(value_err(&node, ValueError::UnknownRes)),
        }
    }

    fn data(&mut self, node: Node, tid: TypeId, dir: Dir) -> Result<Value, ParseError> {
        let ty = self.target.ty_of(tid);
        let mut data = Vec::new();
        let mut size = None;
        for n in node.into_inner() {
            match n.as_rule() {
                Rule::HexData => {
                    let hex_str = inner_str(&n);
                    data = hex::decode(hex_str).map_err(|e| value_err(&n, e.into()))?;
                }
                Rule::StrData => {
                    data = unescape(inner_str(&n)).ok_or_else(|| value_err(&n, ValueError::Escape))?;
                }
                Rule::DataSize => {
                    let num = next(&mut n.clone().into_inner(), &n)?;
                    size = Some(number(&num)?);
                }
                _ => (),
            }
        }
        if dir == Dir::Out {
            let size = size.unwrap_or(data.len() as u64);
            return Ok(DataValue::new_out_data(tid, dir, size).into());
        }
        if let Some(size) = size {
            data.resize(size as usize, 0);
        }
        if !ty.varlen() {
            data.resize(ty.size() as usize, 0);
        }
        Ok(DataValue::new(tid, dir, data).into())
    }

    /// Offset in the data area of an address seen by the kernel.
    fn addr(&self, node: Node) -> Result<u64, ParseError> {
        let addr = number(&node)?;
        let offset = self.target.data_offset();
        if addr < offset || addr - offset >= self.target.mem_size() {
            return Err(value_err(&node, ValueError::Address));
        }
        Ok(addr - offset)
    }

    fn special_ptr(&self, node: &Node, val: u64) -> Result<u64, ParseError> {
        self.target
            .special_ptrs()
            .iter()
            .position(|&p| p == val)
            .map(|idx| idx as u64)
            .ok_or_else(|| value_err(node, ValueError::SpecialPtr))
    }
}

fn next<'a>(
    inner: &mut pest::iterators::Pairs<'a, Rule>,
    parent: &Node<'a>,
) -> Result<Node<'a>, ParseError> {
    inner
        .next()
        .ok_or_else(|| value_err(parent, ValueError::Mismatch(parent.as_str().to_string())))
}

fn inner_str<'a>(node: &Node<'a>) -> &'a str {
    node.clone()
        .into_inner()
        .next()
        .map(|n| n.as_str())
        .unwrap_or("")
}

fn res_name(node: &Node) -> Result<u64, ParseError> {
    node.as_str()[1..]
        .parse::<u64>()
        .map_err(|e| value_err(node, e.into()))
}

fn number(node: &Node) -> Result<u64, ParseError> {
    let s = node.as_str();
    let ret = if let Some(hex) = s.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse::<u64>()
    };
    ret.map_err(|e| value_err(node, e.into()))
}

fn unescape(s: &str) -> Option<Vec<u8>> {
    let mut ret = Vec::with_capacity(s.len());
    let mut bytes = s.bytes();
    while let Some(b) = bytes.next() {
        if b != b'\\' {
            ret.push(b);
            continue;
        }
        let c = match bytes.next()? {
            b't' => b'\t',
            b'r' => b'\r',
            b'n' => b'\n',
            b'0' => 0,
            b'\\' => b'\\',
            b'\'' => b'\'',
            b'"' => b'"',
            b'x' => {
                let hi = (bytes.next()? as char).to_digit(16)?;
                let lo = (bytes.next()? as char).to_digit(16)?;
                (hi * 16 + lo) as u8
            }
            _ => return None,
        };
        ret.push(c);
    }
    Some(ret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{gen::gen_prog, select::ChoiceTable, target::test_target};
    use rand::{rngs::SmallRng, SeedableRng};

    #[test]
    fn parse_all_value_forms() {
        let target = test_target();
        let text = "r0 = open(&(0x20000000)='./file0\\x00', 0x42, 0x1ff)\n\
                    read(r0, &(0x20000040)=\"\"/0x10, 0x10)\n\
                    r1 = socket(0x2, 0x1, 0x0)\n\
                    connect(r1, &(0x20000080)=@ipv4=0x100007f, 0x4)\n\
                    bind$inet(r1, 0x1, 0x0)\n\
                    pipe(&(0x200000c0)=[<r2=>0xffffffffffffffff, 0xffffffffffffffff])\n\
                    close(r2)\n\
                    nanosleep(&(0x20000100)={0x1, 0x0})\n\
                    mmap(&(0x20001000/0x2000)=nil, 0x2000, 0x3, 0xffffffffffffffff, 0x0)\n";
        let p = parse_prog(&target, text).unwrap();
        p.validate(&target);
        assert_eq!(p.len(), 9);
        assert_eq!(p.display(&target).to_string(), text);

        let out = p.calls()[1].args()[1].checked_as_ptr();
        let out = out.pointee.as_ref().unwrap();
        assert_eq!(out.dir(), Dir::Out);
        assert_eq!(out.size(&target), 0x10);
        let hdr = p.calls()[4].args()[2].checked_as_ptr();
        assert!(hdr.is_special());
        let vma = p.calls()[8].args()[0].checked_as_vma();
        assert_eq!(vma.addr, 0x1000);
    }

    #[test]
    fn comments_and_blank_lines() {
        let target = test_target();
        let p = parse_prog(&target, "# seed\n\ngetpid()\n\n# done\ngetpid()").unwrap();
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn reject_bad_progs() {
        let target = test_target();
        assert!(matches!(parse_prog(&target, ""), Err(ParseError::NoCalls)));
        assert!(matches!(
            parse_prog(&target, "getpid(\n"),
            Err(ParseError::Syntax(_))
        ));
        let bad = [
            "nosuchcall()\n",
            "close()\n",
            "close(r0)\n",
            "r0 = getpid()\n",
            "poll(0x1234, 0x0, 0x0)\n",
            "poll(&(0x10)=[], 0x0, 0x0)\n",
            "connect(0xffffffffffffffff, &(0x20000000)=@ipv6=0x1, 0x4)\n",
            "nanosleep(&(0x20000000)={0x1})\n",
            "open(&(0x20000000)='\\q', 0x0, 0x0)\n",
        ];
        for text in bad.iter() {
            match parse_prog(&target, text) {
                Err(ParseError::Value { .. }) => (),
                other => panic!("{}: {:?}", text, other.map(|p| p.len())),
            }
        }
    }

    #[test]
    fn squashed_pointee() {
        let target = test_target();
        let p = parse_prog(&target, "poll(&(0x20000000)=\"0100000002000000\", 0x2, 0x0)\n")
            .unwrap();
        p.validate(&target);
        let ptr = p.calls()[0].args()[0].checked_as_ptr();
        assert_eq!(ptr.pointee.as_ref().unwrap().ty_id(), target.any_blob());
    }

    #[test]
    fn generated_progs_reparse() {
        let target = test_target();
        let ct = ChoiceTable::new(&target, None);
        let mut rng = SmallRng::seed_from_u64(17);
        for _ in 0..256 {
            let p = gen_prog(&target, &ct, &mut rng, 12);
            let text = p.display(&target).to_string();
            let p1 = match parse_prog(&target, &text) {
                Ok(p1) => p1,
                Err(e) => panic!("{}\n{}", e, text),
            };
            assert_eq!(p1.display(&target).to_string(), text);
        }
    }
}
