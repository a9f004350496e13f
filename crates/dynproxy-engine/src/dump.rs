//! Text listing of a registered type

use std::fmt::Write;

use crate::types::{MethodBody, MethodDef, TypeDef, TypeKind, TypeRef, TypeTable, Visibility};

fn visibility(v: Visibility) -> &'static str {
    match v {
        Visibility::Public => "public",
        Visibility::Protected => "protected",
        Visibility::Internal => "internal",
        Visibility::ProtectedInternal => "protected internal",
        Visibility::Private => "private",
    }
}

fn signature(types: &TypeTable, method: &MethodDef) -> String {
    let params: Vec<String> = method
        .parameters
        .iter()
        .map(|p| {
            let prefix = if p.is_out {
                "out "
            } else if p.ty.is_by_ref() {
                "ref "
            } else {
                ""
            };
            format!("{}{} {}", prefix, types.type_name(p.ty.strip_by_ref()), p.name)
        })
        .collect();
    let generics = if method.generic_params.is_empty() {
        String::new()
    } else {
        let names: Vec<&str> = method.generic_params.iter().map(|g| g.name.as_str()).collect();
        format!("<{}>", names.join(", "))
    };
    format!(
        "{} {}{}({})",
        types.type_name(&method.return_type),
        method.name,
        generics,
        params.join(", ")
    )
}

fn render_method(out: &mut String, types: &TypeTable, method: &MethodDef) {
    let mut modifiers = vec![visibility(method.visibility)];
    if method.is_static {
        modifiers.push("static");
    }
    if method.is_abstract {
        modifiers.push("abstract");
    } else if method.is_virtual {
        modifiers.push(if method.is_final { "sealed virtual" } else { "virtual" });
    }
    let _ = writeln!(
        out,
        "  {} {} // #{}",
        modifiers.join(" "),
        signature(types, method),
        method.id.0
    );
    for attribute in &method.attributes {
        let _ = writeln!(
            out,
            "    [{}]",
            types.type_name(&TypeRef::named(attribute.attribute_type))
        );
    }
    match &method.body {
        MethodBody::Abstract => {}
        MethodBody::Native(_) => {
            let _ = writeln!(out, "    <native>");
        }
        MethodBody::Compiled(code) => {
            for line in code.disassemble().lines() {
                let _ = writeln!(out, "  {}", line);
            }
        }
    }
}

/// Fields, members and disassembled bodies of `def`
pub fn render_type(types: &TypeTable, def: &TypeDef) -> String {
    let mut out = String::new();
    let kind = match def.kind {
        TypeKind::Class => "class",
        TypeKind::Interface => "interface",
        TypeKind::Enum => "enum",
    };
    let mut bases: Vec<String> = Vec::new();
    if let Some(parent) = &def.parent {
        bases.push(types.type_name(parent));
    }
    bases.extend(def.interfaces.iter().map(|i| types.type_name(i)));

    for attribute in &def.attributes {
        let _ = writeln!(
            out,
            "[{}]",
            types.type_name(&TypeRef::named(attribute.attribute_type))
        );
    }
    let mut header = format!("{} {}", kind, def.name);
    if def.is_sealed {
        header = format!("sealed {}", header);
    }
    if def.is_abstract && def.kind == TypeKind::Class {
        header = format!("abstract {}", header);
    }
    if !bases.is_empty() {
        header.push_str(" : ");
        header.push_str(&bases.join(", "));
    }
    let _ = writeln!(out, "{} {{", header);

    for field in &def.fields {
        let _ = writeln!(
            out,
            "  {}{} {} {}; // slot {}",
            visibility(field.visibility),
            if field.is_static { " static" } else { "" },
            types.type_name(&field.ty),
            field.name,
            field.slot
        );
    }

    let members = def
        .type_initializer
        .iter()
        .chain(&def.constructors)
        .chain(&def.methods)
        .filter_map(|id| types.method(*id));
    for method in members {
        out.push('\n');
        render_method(&mut out, types, &method);
    }

    if !def.properties.is_empty() || !def.events.is_empty() {
        out.push('\n');
    }
    for property in &def.properties {
        let _ = writeln!(
            out,
            "  property {} {} {{{}{} }}",
            types.type_name(&property.ty),
            property.name,
            if property.getter.is_some() { " get;" } else { "" },
            if property.setter.is_some() { " set;" } else { "" }
        );
    }
    for event in &def.events {
        let _ = writeln!(
            out,
            "  event {} {}",
            types.type_name(&event.handler_type),
            event.name
        );
    }

    if !def.overrides.is_empty() {
        out.push('\n');
        for (slot, implementation) in &def.overrides {
            let slot = types
                .method(*slot)
                .map(|m| {
                    format!(
                        "{}.{}",
                        types.type_name(&TypeRef::named(m.declaring_type)),
                        m.name
                    )
                })
                .unwrap_or_else(|| format!("#{}", slot.0));
            let _ = writeln!(out, "  .override {} with #{}", slot, implementation.0);
        }
    }
    out.push_str("}\n");
    out
}
