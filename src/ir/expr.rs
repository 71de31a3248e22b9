//! Primitive binary expression parsing (spec §4.2,
//! `create_primitive_binary_expression_parser`).
//!
//! The four operand-shape variants named in the spec (imm/imm, imm/var,
//! var/imm, var/var) all funnel through the same validation, since a
//! `Value` already carries its own type regardless of which variant
//! produced it.

use crate::error::{IrResult, IrValidationError};
use crate::ir::value::{AbstractOperation, BinaryOperator, Value};
use crate::types::TypeDescriptor;

pub struct BinaryExpressionParser {
    operator: BinaryOperator,
}

impl BinaryExpressionParser {
    pub fn new(operator: BinaryOperator) -> Self {
        BinaryExpressionParser { operator }
    }

    pub fn imm_imm(&self, left: Value, right: Value) -> IrResult<Value> {
        self.build(left, right)
    }
    pub fn imm_var(&self, left: Value, right: Value) -> IrResult<Value> {
        self.build(left, right)
    }
    pub fn var_imm(&self, left: Value, right: Value) -> IrResult<Value> {
        self.build(left, right)
    }
    pub fn var_var(&self, left: Value, right: Value) -> IrResult<Value> {
        self.build(left, right)
    }

    fn build(&self, left: Value, right: Value) -> IrResult<Value> {
        if left.is_expression() || right.is_expression() {
            return Err(IrValidationError::ExpressionArgumentNotAllowed);
        }
        if !left.ty().is_primitive || !right.ty().is_primitive {
            return Err(IrValidationError::NonPrimitiveOperand);
        }
        if left.ty() != right.ty() {
            return Err(IrValidationError::OperandTypeMismatch);
        }
        if self.operator == BinaryOperator::Mod && left.ty().is_floating_point() {
            return Err(IrValidationError::FloatModuloUnsupported);
        }
        let result_ty = if self.operator.is_comparison() {
            TypeDescriptor::bool_()
        } else {
            left.ty()
        };
        Ok(Value::Expression(Box::new(AbstractOperation {
            operator: self.operator,
            left,
            right,
            result_ty,
        })))
    }
}
