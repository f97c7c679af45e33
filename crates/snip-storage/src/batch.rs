use snip_core::StorageError;

/// Keeps the first unique violation of a batch and propagates anything else.
#[derive(Debug, Default)]
pub(crate) struct BatchConflicts {
    first: Option<StorageError>,
    count: usize,
}

impl BatchConflicts {
    pub fn record(&mut self, result: Result<(), StorageError>) -> Result<(), StorageError> {
        match result {
            Ok(()) => Ok(()),
            Err(err @ StorageError::UniqueViolation { .. }) => {
                self.count += 1;
                self.first.get_or_insert(err);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn finish(self) -> Result<(), StorageError> {
        match self.first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
