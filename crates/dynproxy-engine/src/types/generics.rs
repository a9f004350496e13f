//! Generic parameter propagation
//!
//! Synthesized members re-declare the generic parameters of the member they
//! stand in for. Attributes (variance, constraint flags) are copied as-is;
//! constraints are rewritten so that references to the source parameters
//! point at the freshly declared ones.

use crate::types::{GenericOwner, GenericParameterDef, TypeRef};

/// Copy `source` parameters onto a new owner.
///
/// Constraints that refer to a parameter of the source owner are rewritten
/// to the new owner at the same position. A constraint that cannot be
/// rewritten (it refers to a position the new declaration does not have)
/// leaves that parameter unconstrained instead of failing.
pub fn copy_generic_parameters(
    source: &[GenericParameterDef],
    source_owner: GenericOwner,
    new_owner: GenericOwner,
) -> Vec<GenericParameterDef> {
    let count = source.len();
    source
        .iter()
        .map(|param| {
            let mut copy = GenericParameterDef {
                owner: new_owner,
                interface_constraints: Vec::new(),
                class_constraint: None,
                ..param.clone()
            };

            let interfaces: Option<Vec<TypeRef>> = param
                .interface_constraints
                .iter()
                .map(|c| adjust_constraint(c, source_owner, new_owner, count))
                .collect();
            let class = match &param.class_constraint {
                Some(c) => adjust_constraint(c, source_owner, new_owner, count).map(Some),
                None => Some(None),
            };

            match (interfaces, class) {
                (Some(interfaces), Some(class)) => {
                    copy.interface_constraints = interfaces;
                    copy.class_constraint = class;
                }
                _ => {
                    tracing::debug!(
                        parameter = %param.name,
                        "constraint references an undeclared generic parameter; \
                         declaring the parameter without constraints"
                    );
                    copy.reference_type = false;
                    copy.value_type = false;
                    copy.default_constructor = false;
                }
            }
            copy
        })
        .collect()
}

/// Rewrite one constraint onto the new owner; `None` when it references a
/// parameter the new declaration lacks.
pub fn adjust_constraint(
    constraint: &TypeRef,
    source_owner: GenericOwner,
    new_owner: GenericOwner,
    declared: usize,
) -> Option<TypeRef> {
    let mut failed = false;
    let adjusted = constraint.map_generic(&mut |owner, position| {
        if owner != source_owner {
            return None;
        }
        if position as usize >= declared {
            failed = true;
            return None;
        }
        Some(TypeRef::GenericParam(new_owner, position))
    });
    if failed {
        None
    } else {
        Some(adjusted)
    }
}

/// Move method-level generic parameters to the type level (used when a
/// generic method's invocation type becomes a generic type).
pub fn method_params_to_type_params(ty: &TypeRef) -> TypeRef {
    ty.map_generic(&mut |owner, position| match owner {
        GenericOwner::Method => Some(TypeRef::type_param(position)),
        GenericOwner::Type => None,
    })
}

/// Generic arguments that refer to each of `params` by position
pub fn arguments_for(params: &[GenericParameterDef], owner: GenericOwner) -> Vec<TypeRef> {
    params
        .iter()
        .map(|p| TypeRef::GenericParam(owner, p.position))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TypeId, Variance};

    #[test]
    fn test_copy_rewrites_self_referencing_constraint() {
        let mut t = GenericParameterDef::new("T", GenericOwner::Method, 0);
        t.variance = Variance::Covariant;
        t.interface_constraints = vec![TypeRef::Named(TypeId(60), vec![TypeRef::method_param(0)])];
        let mut u = GenericParameterDef::new("U", GenericOwner::Method, 1);
        u.class_constraint = Some(TypeRef::method_param(0));

        let copied = copy_generic_parameters(&[t, u], GenericOwner::Method, GenericOwner::Type);

        assert_eq!(copied[0].owner, GenericOwner::Type);
        assert_eq!(copied[0].variance, Variance::Covariant);
        assert_eq!(
            copied[0].interface_constraints,
            vec![TypeRef::Named(TypeId(60), vec![TypeRef::type_param(0)])]
        );
        assert_eq!(copied[1].class_constraint, Some(TypeRef::type_param(0)));
    }

    #[test]
    fn test_unresolvable_constraint_falls_back_to_unconstrained() {
        let mut t = GenericParameterDef::new("T", GenericOwner::Method, 0);
        t.default_constructor = true;
        t.class_constraint = Some(TypeRef::method_param(3));

        let copied = copy_generic_parameters(&[t], GenericOwner::Method, GenericOwner::Method);

        assert!(copied[0].is_unconstrained());
        assert_eq!(copied[0].name, "T");
    }

    #[test]
    fn test_constraints_of_other_owner_are_kept() {
        let mut t = GenericParameterDef::new("T", GenericOwner::Method, 0);
        t.class_constraint = Some(TypeRef::type_param(5));
        let copied = copy_generic_parameters(&[t], GenericOwner::Method, GenericOwner::Type);
        assert_eq!(copied[0].class_constraint, Some(TypeRef::type_param(5)));
    }

    #[test]
    fn test_method_params_to_type_params() {
        let ty = TypeRef::array_of(TypeRef::method_param(1));
        assert_eq!(
            method_params_to_type_params(&ty),
            TypeRef::array_of(TypeRef::type_param(1))
        );
    }
}
