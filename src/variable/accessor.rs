use crate::{Error, ReadResult, Status};

use super::ValueReference;

macro_rules! provided_access {
    ($($name:ident: $ty:ty),*) => {
        paste::paste! {
            $(
                #[doc = concat!("Read many `", stringify!($ty), "` values into a new `Vec`.")]
                fn [<read_ $name s>](
                    &mut self,
                    vrs: &[ValueReference],
                ) -> Result<ReadResult<Vec<$ty>>, Error> {
                    let mut values = vec![<$ty>::default(); vrs.len()];
                    let status = self.[<get_ $name>](vrs, &mut values)?;
                    Ok(ReadResult::new(status, values))
                }

                fn [<read_ $name>](&mut self, vr: ValueReference) -> Result<ReadResult<$ty>, Error> {
                    let mut value = [<$ty>::default()];
                    let status = self.[<get_ $name>](&[vr], &mut value)?;
                    let [value] = value;
                    Ok(ReadResult::new(status, value))
                }

                fn [<write_ $name s>](
                    &mut self,
                    vrs: &[ValueReference],
                    values: &[$ty],
                ) -> Result<Status, Error> {
                    self.[<set_ $name>](vrs, values)
                }

                fn [<write_ $name>](&mut self, vr: ValueReference, value: $ty) -> Result<Status, Error> {
                    self.[<set_ $name>](&[vr], &[value])
                }
            )*
        }
    };
}

/// The native call surface used by variable reads and writes.
///
/// Implementors check that `vrs` and `values` have equal length before crossing into native code
/// and fail with [`Error::Argument`] otherwise. Enumerations use the integer functions.
pub trait VariableAccessor {
    fn get_real(&mut self, vrs: &[ValueReference], values: &mut [f64]) -> Result<Status, Error>;
    fn get_integer(&mut self, vrs: &[ValueReference], values: &mut [i32])
        -> Result<Status, Error>;
    fn get_boolean(&mut self, vrs: &[ValueReference], values: &mut [bool])
        -> Result<Status, Error>;
    fn get_string(
        &mut self,
        vrs: &[ValueReference],
        values: &mut [String],
    ) -> Result<Status, Error>;

    fn set_real(&mut self, vrs: &[ValueReference], values: &[f64]) -> Result<Status, Error>;
    fn set_integer(&mut self, vrs: &[ValueReference], values: &[i32]) -> Result<Status, Error>;
    fn set_boolean(&mut self, vrs: &[ValueReference], values: &[bool]) -> Result<Status, Error>;
    fn set_string(&mut self, vrs: &[ValueReference], values: &[&str]) -> Result<Status, Error>;

    provided_access!(real: f64, integer: i32, boolean: bool);

    fn read_strings(&mut self, vrs: &[ValueReference]) -> Result<ReadResult<Vec<String>>, Error> {
        let mut values = vec![String::new(); vrs.len()];
        let status = self.get_string(vrs, &mut values)?;
        Ok(ReadResult::new(status, values))
    }

    fn read_string(&mut self, vr: ValueReference) -> Result<ReadResult<String>, Error> {
        Ok(self
            .read_strings(&[vr])?
            .map(|values| values.into_iter().next().unwrap_or_default()))
    }

    fn write_strings(&mut self, vrs: &[ValueReference], values: &[&str]) -> Result<Status, Error> {
        self.set_string(vrs, values)
    }

    fn write_string(&mut self, vr: ValueReference, value: &str) -> Result<Status, Error> {
        self.set_string(&[vr], &[value])
    }
}

/// Fail with [`Error::Argument`] unless the value-reference and value buffers have equal length.
pub fn check_lengths(vrs: usize, values: usize) -> Result<(), Error> {
    if vrs == values {
        Ok(())
    } else {
        Err(Error::Argument(format!(
            "{vrs} value references but {values} values"
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    /// Echoes written reals, reports Discard for unknown references.
    #[derive(Default)]
    struct Memory(HashMap<ValueReference, f64>);

    impl VariableAccessor for Memory {
        fn get_real(&mut self, vrs: &[ValueReference], values: &mut [f64]) -> Result<Status, Error> {
            check_lengths(vrs.len(), values.len())?;
            let mut status = Status::OK;
            for (vr, value) in vrs.iter().zip(values.iter_mut()) {
                match self.0.get(vr) {
                    Some(v) => *value = *v,
                    None => status = status.worst(Status::Discard),
                }
            }
            Ok(status)
        }

        fn get_integer(&mut self, _: &[ValueReference], _: &mut [i32]) -> Result<Status, Error> {
            Ok(Status::Error)
        }

        fn get_boolean(&mut self, _: &[ValueReference], _: &mut [bool]) -> Result<Status, Error> {
            Ok(Status::Error)
        }

        fn get_string(&mut self, _: &[ValueReference], _: &mut [String]) -> Result<Status, Error> {
            Ok(Status::Error)
        }

        fn set_real(&mut self, vrs: &[ValueReference], values: &[f64]) -> Result<Status, Error> {
            check_lengths(vrs.len(), values.len())?;
            self.0.extend(vrs.iter().copied().zip(values.iter().copied()));
            Ok(Status::OK)
        }

        fn set_integer(&mut self, _: &[ValueReference], _: &[i32]) -> Result<Status, Error> {
            Ok(Status::Error)
        }

        fn set_boolean(&mut self, _: &[ValueReference], _: &[bool]) -> Result<Status, Error> {
            Ok(Status::Error)
        }

        fn set_string(&mut self, _: &[ValueReference], _: &[&str]) -> Result<Status, Error> {
            Ok(Status::Error)
        }
    }

    #[test]
    fn test_provided_methods() {
        let mut memory = Memory::default();
        assert_eq!(memory.write_reals(&[1, 2], &[0.5, 1.5]).unwrap(), Status::OK);
        assert_eq!(memory.read_real(2).unwrap().value(), Some(&1.5));

        let many = memory.read_reals(&[1, 2]).unwrap();
        assert_eq!(many.into_value(), Some(vec![0.5, 1.5]));

        let missing = memory.read_reals(&[1, 9]).unwrap();
        assert_eq!(missing.status, Status::Discard);
        assert!(missing.value().is_none());

        assert_eq!(memory.read_integer(0).unwrap().status, Status::Error);
    }

    #[test]
    fn test_length_mismatch() {
        let mut memory = Memory::default();
        assert!(matches!(
            memory.set_real(&[1, 2], &[0.5]),
            Err(Error::Argument(_))
        ));
    }
}
