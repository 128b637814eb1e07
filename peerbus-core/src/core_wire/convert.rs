//! Conversion between host values and transport data

use super::data::Data;
use super::error::{CodecError, CodecResult};
use crate::core_host::{RecordField, Type, Val};
use std::collections::{BTreeMap, BTreeSet};

/// Convert a host value to its wire representation
pub fn val_to_data(val: &Val) -> CodecResult<Data> {
    let data = match val {
        Val::Bool(b) => Data::Boolean(*b),
        Val::Count(c) => Data::Count(*c),
        Val::Int(i) => Data::Integer(*i),
        Val::Double(d) => Data::Real(*d),
        Val::String(s) => Data::String(s.clone()),
        Val::Addr(a) => Data::Address(*a),
        Val::Subnet(network, length) => Data::Subnet {
            network: *network,
            length: *length,
        },
        Val::Port(number, protocol) => Data::Port {
            number: *number,
            protocol: *protocol,
        },
        Val::Time(t) => Data::Timestamp(*t),
        Val::Interval(t) => Data::Timespan(*t),
        Val::Enum { name, .. } => Data::EnumValue(name.clone()),
        Val::Vector(items) => Data::Vector(items.iter().map(val_to_data).collect::<CodecResult<_>>()?),
        Val::Set(items) => Data::Set(
            items
                .iter()
                .map(val_to_data)
                .collect::<CodecResult<BTreeSet<_>>>()?,
        ),
        Val::Table(entries) => {
            let mut table = BTreeMap::new();
            for (k, v) in entries {
                table.insert(val_to_data(k)?, val_to_data(v)?);
            }
            Data::Table(table)
        }
        Val::Record(fields) => Data::Vector(
            fields
                .iter()
                .map(|f| match f {
                    Some(v) => val_to_data(v),
                    None => Ok(Data::None),
                })
                .collect::<CodecResult<_>>()?,
        ),
        Val::Event(_) => return Err(CodecError::Unrepresentable("event")),
        Val::Func(_) => return Err(CodecError::Unrepresentable("func")),
        Val::Opaque(_) => return Err(CodecError::Unrepresentable("opaque")),
    };
    Ok(data)
}

/// Convert wire data to a host value of the declared type
pub fn data_to_val(data: &Data, ty: &Type) -> CodecResult<Val> {
    let val = match (ty, data) {
        (Type::Any, _) => return infer_val(data),
        (Type::Bool, Data::Boolean(b)) => Val::Bool(*b),
        (Type::Count, Data::Count(c)) => Val::Count(*c),
        (Type::Int, Data::Integer(i)) => Val::Int(*i),
        (Type::Double, Data::Real(r)) => Val::Double(*r),
        (Type::String, Data::String(s)) => Val::String(s.clone()),
        (Type::Addr, Data::Address(a)) => Val::Addr(*a),
        (Type::Subnet, Data::Subnet { network, length }) => Val::Subnet(*network, *length),
        (Type::Port, Data::Port { number, protocol }) => Val::Port(*number, *protocol),
        (Type::Time, Data::Timestamp(t)) => Val::Time(*t),
        (Type::Interval, Data::Timespan(t)) => Val::Interval(*t),
        (Type::Enum(type_name), Data::EnumValue(name)) => Val::Enum {
            type_name: type_name.clone(),
            name: name.clone(),
        },
        (Type::Vector(inner), Data::Vector(items)) => Val::Vector(
            items
                .iter()
                .map(|d| data_to_val(d, inner))
                .collect::<CodecResult<_>>()?,
        ),
        (Type::Set(inner), Data::Set(items)) => Val::Set(
            items
                .iter()
                .map(|d| data_to_val(d, inner))
                .collect::<CodecResult<_>>()?,
        ),
        (Type::Table(kt, vt), Data::Table(entries)) => Val::Table(
            entries
                .iter()
                .map(|(k, v)| Ok((data_to_val(k, kt)?, data_to_val(v, vt)?)))
                .collect::<CodecResult<_>>()?,
        ),
        (Type::Record(fields), Data::Vector(items)) => record_from_data(fields, items)?,
        (Type::Event | Type::Func | Type::Opaque(_), _) => {
            return Err(CodecError::Unrepresentable("function and opaque"))
        }
        (expected, found) => return Err(CodecError::mismatch(expected, found.type_name())),
    };
    Ok(val)
}

fn record_from_data(fields: &[RecordField], items: &[Data]) -> CodecResult<Val> {
    if fields.len() != items.len() {
        return Err(CodecError::malformed(format!(
            "record has {} fields, got {}",
            fields.len(),
            items.len()
        )));
    }

    let mut values = Vec::with_capacity(fields.len());
    for (field, item) in fields.iter().zip(items) {
        if item.is_none() {
            if !field.optional {
                return Err(CodecError::malformed(format!(
                    "missing value for non-optional field '{}'",
                    field.name
                )));
            }
            values.push(None);
        } else {
            values.push(Some(data_to_val(item, &field.ty)?));
        }
    }
    Ok(Val::Record(values))
}

fn infer_val(data: &Data) -> CodecResult<Val> {
    let val = match data {
        Data::None => return Err(CodecError::malformed("cannot infer a value from none")),
        Data::Boolean(b) => Val::Bool(*b),
        Data::Count(c) => Val::Count(*c),
        Data::Integer(i) => Val::Int(*i),
        Data::Real(r) => Val::Double(*r),
        Data::String(s) => Val::String(s.clone()),
        Data::Address(a) => Val::Addr(*a),
        Data::Subnet { network, length } => Val::Subnet(*network, *length),
        Data::Port { number, protocol } => Val::Port(*number, *protocol),
        Data::Timestamp(t) => Val::Time(*t),
        Data::Timespan(t) => Val::Interval(*t),
        Data::EnumValue(name) => Val::Enum {
            type_name: String::new(),
            name: name.clone(),
        },
        Data::Set(items) => Val::Set(items.iter().map(infer_val).collect::<CodecResult<_>>()?),
        Data::Table(entries) => Val::Table(
            entries
                .iter()
                .map(|(k, v)| Ok((infer_val(k)?, infer_val(v)?)))
                .collect::<CodecResult<_>>()?,
        ),
        Data::Vector(items) => Val::Vector(items.iter().map(infer_val).collect::<CodecResult<_>>()?),
    };
    Ok(val)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_conversion() {
        let data = val_to_data(&Val::Count(42)).unwrap();
        assert_eq!(data, Data::Count(42));
        assert_eq!(data_to_val(&data, &Type::Count).unwrap(), Val::Count(42));
    }

    #[test]
    fn test_type_mismatch() {
        let err = data_to_val(&Data::from("x"), &Type::Count).unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { .. }));
    }

    #[test]
    fn test_func_has_no_wire_form() {
        assert_eq!(
            val_to_data(&Val::Func("f".into())),
            Err(CodecError::Unrepresentable("func"))
        );
        let nested = Val::Vector(vec![Val::Count(1), Val::Opaque("handle".into())]);
        assert!(val_to_data(&nested).is_err());
    }

    #[test]
    fn test_record_with_optional_field() {
        let fields = vec![
            RecordField::new("host", Type::Addr),
            RecordField::optional("user", Type::String),
        ];
        let record = Val::Record(vec![Some(Val::Addr("10.0.0.1".parse().unwrap())), None]);

        let data = val_to_data(&record).unwrap();
        let back = data_to_val(&data, &Type::Record(fields.clone())).unwrap();
        assert_eq!(back, record);

        let missing = Data::Vector(vec![Data::None, Data::None]);
        assert!(data_to_val(&missing, &Type::Record(fields)).is_err());
    }

    #[test]
    fn test_any_infers() {
        let v = data_to_val(&Data::Vector(vec![Data::Integer(-3)]), &Type::Any).unwrap();
        assert_eq!(v, Val::Vector(vec![Val::Int(-3)]));
    }
}
