//! Structural method-signature comparison
//!
//! Two methods have the same signature when their names match, they agree
//! on generic arity, and their parameter and return types compare equal
//! with generic parameters matched by position. The comparison is
//! symmetric by construction: every rule is an equality on both sides.

use crate::types::{GenericParameterDef, MethodDef, TypeRef};

/// The parts of a method that take part in signature comparison
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    /// Method name
    pub name: String,
    /// Declared generic parameters
    pub generic_params: Vec<GenericParameterDef>,
    /// Parameter types
    pub params: Vec<TypeRef>,
    /// Return type
    pub return_type: TypeRef,
}

impl MethodSignature {
    /// Signature of a declared method
    pub fn of(method: &MethodDef) -> Self {
        Self {
            name: method.name.clone(),
            generic_params: method.generic_params.clone(),
            params: method.parameters.iter().map(|p| p.ty.clone()).collect(),
            return_type: method.return_type.clone(),
        }
    }

    /// Signature of a method as seen through a constructed declaring type
    pub fn closed(method: &MethodDef, type_args: &[TypeRef]) -> Self {
        let mut signature = Self::of(method);
        if !type_args.is_empty() {
            signature.params = signature
                .params
                .iter()
                .map(|p| p.substitute(type_args, &[]))
                .collect();
            signature.return_type = signature.return_type.substitute(type_args, &[]);
            for param in &mut signature.generic_params {
                param.interface_constraints = param
                    .interface_constraints
                    .iter()
                    .map(|c| c.substitute(type_args, &[]))
                    .collect();
                param.class_constraint = param
                    .class_constraint
                    .as_ref()
                    .map(|c| c.substitute(type_args, &[]));
            }
        }
        signature
    }
}

/// Whether two declared methods have the same signature
pub fn same_signature(a: &MethodDef, b: &MethodDef) -> bool {
    same_signature_parts(&MethodSignature::of(a), &MethodSignature::of(b))
}

/// Whether two signatures are the same
pub fn same_signature_parts(a: &MethodSignature, b: &MethodSignature) -> bool {
    a.name == b.name && equal_generic_parameters(a, b) && equal_parameters_and_return(a, b)
}

/// Signature equality ignoring names (used for interface mapping through
/// explicit implementations, whose names are qualified)
pub fn same_shape(a: &MethodSignature, b: &MethodSignature) -> bool {
    equal_generic_parameters(a, b) && equal_parameters_and_return(a, b)
}

fn equal_generic_parameters(a: &MethodSignature, b: &MethodSignature) -> bool {
    if a.generic_params.len() != b.generic_params.len() {
        return false;
    }
    a.generic_params
        .iter()
        .zip(&b.generic_params)
        .all(|(x, y)| equal_constraints(x, y))
}

// Unconstrained matches unconstrained; otherwise every constraint must be
// the identical type.
fn equal_constraints(x: &GenericParameterDef, y: &GenericParameterDef) -> bool {
    if x.is_unconstrained() || y.is_unconstrained() {
        return x.is_unconstrained() && y.is_unconstrained();
    }
    x.reference_type == y.reference_type
        && x.value_type == y.value_type
        && x.default_constructor == y.default_constructor
        && x.interface_constraints.len() == y.interface_constraints.len()
        && x.interface_constraints
            .iter()
            .zip(&y.interface_constraints)
            .all(|(a, b)| equal_signature_types(a, b))
        && match (&x.class_constraint, &y.class_constraint) {
            (Some(a), Some(b)) => equal_signature_types(a, b),
            (None, None) => true,
            _ => false,
        }
}

fn equal_parameters_and_return(a: &MethodSignature, b: &MethodSignature) -> bool {
    a.params.len() == b.params.len()
        && a.params
            .iter()
            .zip(&b.params)
            .all(|(x, y)| equal_signature_types(x, y))
        && equal_signature_types(&a.return_type, &b.return_type)
}

/// Type equality with generic parameters compared by position only
pub fn equal_signature_types(x: &TypeRef, y: &TypeRef) -> bool {
    match (x, y) {
        (TypeRef::GenericParam(_, px), TypeRef::GenericParam(_, py)) => px == py,
        (TypeRef::Named(ix, ax), TypeRef::Named(iy, ay)) => {
            ix == iy
                && ax.len() == ay.len()
                && ax.iter().zip(ay).all(|(a, b)| equal_signature_types(a, b))
        }
        (TypeRef::Array(a), TypeRef::Array(b)) | (TypeRef::ByRef(a), TypeRef::ByRef(b)) => {
            equal_signature_types(a, b)
        }
        _ => x == y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GenericOwner, TypeId};

    fn signature(name: &str, generics: usize, params: Vec<TypeRef>, ret: TypeRef) -> MethodSignature {
        MethodSignature {
            name: name.to_string(),
            generic_params: (0..generics)
                .map(|i| GenericParameterDef::new(format!("T{}", i), GenericOwner::Method, i as u16))
                .collect(),
            params,
            return_type: ret,
        }
    }

    #[test]
    fn test_names_must_match() {
        let a = signature("Do", 0, vec![TypeRef::i32()], TypeRef::Void);
        let b = signature("Run", 0, vec![TypeRef::i32()], TypeRef::Void);
        assert!(!same_signature_parts(&a, &b));
        assert!(same_shape(&a, &b));
    }

    #[test]
    fn test_generic_positions_compare_equal() {
        let a = signature("Get", 1, vec![TypeRef::method_param(0)], TypeRef::method_param(0));
        let b = signature("Get", 1, vec![TypeRef::method_param(0)], TypeRef::method_param(0));
        assert!(same_signature_parts(&a, &b));

        let c = signature("Get", 0, vec![TypeRef::i32()], TypeRef::i32());
        assert!(!same_signature_parts(&a, &c));
        assert!(!same_signature_parts(&c, &a));
    }

    #[test]
    fn test_constrained_against_unconstrained() {
        let a = signature("Get", 1, vec![], TypeRef::Void);
        let mut b = a.clone();
        b.generic_params[0].interface_constraints = vec![TypeRef::named(TypeId(50))];
        assert!(!same_signature_parts(&a, &b));
        assert!(!same_signature_parts(&b, &a));

        let c = b.clone();
        assert!(same_signature_parts(&b, &c));
    }

    #[test]
    fn test_symmetry_over_samples() {
        let samples = vec![
            signature("M", 0, vec![], TypeRef::Void),
            signature("M", 0, vec![TypeRef::by_ref(TypeRef::i32())], TypeRef::Void),
            signature("M", 0, vec![TypeRef::i32()], TypeRef::Void),
            signature("M", 1, vec![TypeRef::method_param(0)], TypeRef::Void),
            signature("M", 1, vec![TypeRef::array_of(TypeRef::method_param(0))], TypeRef::Void),
            signature("M", 2, vec![TypeRef::method_param(1)], TypeRef::i32()),
        ];
        for a in &samples {
            for b in &samples {
                assert_eq!(same_signature_parts(a, b), same_signature_parts(b, a));
            }
        }
    }

    #[test]
    fn test_closed_signature_substitutes_type_arguments() {
        let open = signature("Put", 0, vec![TypeRef::type_param(0)], TypeRef::Void);
        let mut method_params = open.clone();
        method_params.params = vec![TypeRef::string()];
        let closed = MethodSignature {
            params: open.params.iter().map(|p| p.substitute(&[TypeRef::string()], &[])).collect(),
            ..open
        };
        assert!(same_signature_parts(&closed, &method_params));
    }
}
