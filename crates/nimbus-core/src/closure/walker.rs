//! Instruction-stream inspection.
//!
//! A function's dependencies are discovered without executing it: the
//! instruction stream is decoded sequentially as (operation, operand)
//! pairs using the per-operation operand widths, and every name read by a
//! global-load operation is recorded. No other operation category is
//! inspected; attribute names, locals, and captures never name a
//! module-global binding.

use nimbus_runtime::{operand_widths, read_u16, Code, Op};

/// The stream could not be decoded: unknown opcode, truncated operands, or
/// a name-table index out of range.
#[derive(Debug, thiserror::Error)]
#[error("offset {offset}: {detail}")]
pub struct WalkError {
    pub offset: usize,
    pub detail: String,
}

/// Names of the module-global bindings a code object reads.
///
/// The result is a set, but it is returned in first-seen order so that
/// dependency capture enqueues in a reproducible order and the serialized
/// graph is stable for identical input.
pub fn global_reads(code: &Code) -> Result<Vec<String>, WalkError> {
    let ins = &code.instructions;
    let mut names: Vec<String> = Vec::new();
    let mut i = 0;

    while i < ins.len() {
        let op = Op::from_byte(ins[i]).ok_or_else(|| WalkError {
            offset: i,
            detail: format!("unknown opcode {}", ins[i]),
        })?;

        let width: usize = operand_widths(op).iter().sum();
        if i + 1 + width > ins.len() {
            return Err(WalkError {
                offset: i,
                detail: format!("truncated operands for {op}"),
            });
        }

        if op == Op::LoadGlobal {
            let index = read_u16(ins, i + 1) as usize;
            let name = code.names.get(index).ok_or_else(|| WalkError {
                offset: i,
                detail: format!("name index {index} out of range"),
            })?;
            if !names.iter().any(|n| n == name) {
                names.push(name.clone());
            }
        }

        i += 1 + width;
    }

    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_runtime::{CodeBuilder, Literal};

    #[test]
    fn records_global_reads_in_first_seen_order() {
        let mut b = CodeBuilder::new();
        b.load_global("beta");
        b.load_global("alpha");
        b.load_global("beta");
        b.ret();
        assert_eq!(global_reads(&b.finish()).unwrap(), vec!["beta", "alpha"]);
    }

    #[test]
    fn ignores_locals_attributes_and_constants() {
        let mut b = CodeBuilder::new().params(["x"]);
        b.load_local(0);
        b.load_attr("field");
        b.load_const(Literal::Str("field2".to_string()));
        b.ret();
        assert!(global_reads(&b.finish()).unwrap().is_empty());
    }

    #[test]
    fn rejects_unknown_opcodes() {
        let mut code = CodeBuilder::new().finish();
        code.instructions = vec![0xee];
        let err = global_reads(&code).unwrap_err();
        assert!(err.detail.contains("unknown opcode"));
    }

    #[test]
    fn rejects_truncated_operands() {
        let mut b = CodeBuilder::new();
        b.load_global("g");
        let mut code = b.finish();
        code.instructions.truncate(2);
        assert!(global_reads(&code).is_err());
    }

    #[test]
    fn rejects_dangling_name_index() {
        let mut b = CodeBuilder::new();
        b.load_global("g");
        let mut code = b.finish();
        code.names.clear();
        let err = global_reads(&code).unwrap_err();
        assert!(err.detail.contains("out of range"));
    }
}
