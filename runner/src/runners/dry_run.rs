use super::{Runner, RunnerError};
use crate::{
    collector::CollectionReport,
    configuration::{Configuration, GroupKey},
};
use std::io::Write;
use tracing::{info, warn};

/// Runner that only reports what would be submitted
pub struct DryRunner {
    output: Box<dyn Write>,
}

impl DryRunner {
    pub fn new(output: Box<dyn Write>) -> Self {
        Self { output }
    }
}

impl Runner for DryRunner {
    fn run(&mut self, config: &Configuration) -> Result<(), RunnerError> {
        info!("{config}");
        writeln!(self.output, "{config}")?;

        if let Err(reason) = config.runnable() {
            warn!("{reason}");
            writeln!(self.output, "  not runnable: {reason}")?;
        }

        Ok(())
    }

    fn run_grouped(&mut self, key: GroupKey, configs: &[Configuration]) -> Result<(), RunnerError> {
        info!("{key} -> {} configurations", configs.len());
        writeln!(self.output, "{key} -> {} configurations", configs.len())?;

        Ok(())
    }

    fn collect(&mut self, _repetition: u32, _offset: u32) -> Result<CollectionReport, RunnerError> {
        Err(RunnerError::Unsupported {
            runner: "dry-run",
            operation: "collect",
        })
    }

    fn verify(&mut self, _repetition: u32) -> Result<bool, RunnerError> {
        Err(RunnerError::Unsupported {
            runner: "dry-run",
            operation: "verify",
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::implementation::Implementation;
    use std::{cell::RefCell, io, rc::Rc};

    /// writer whose content stays readable after being boxed
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(pub Rc<RefCell<Vec<u8>>>);

    impl SharedBuffer {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn reports_configuration_and_reason() {
        let buffer = SharedBuffer::default();
        let mut runner = DryRunner::new(Box::new(buffer.clone()));
        let allreduce = Implementation::lookup("allreduce").unwrap();

        runner.run(&Configuration::new(16, 16, 4, allreduce)).unwrap();
        runner.run(&Configuration::new(16, 16, 64, allreduce)).unwrap();

        let output = buffer.contents();
        let lines = output.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "16, 4 nodes, allreduce, 1x");
        assert_eq!(lines[1], "16, 64 nodes, allreduce, 1x");
        assert!(lines[2].contains("up to 48 nodes"));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn reports_group_sizes() {
        let buffer = SharedBuffer::default();
        let mut runner = DryRunner::new(Box::new(buffer.clone()));
        let config = Configuration::new(16, 16, 4, Implementation::lookup("allgather").unwrap());

        runner
            .run_grouped(config.group_key(), &[config.clone(), config])
            .unwrap();

        assert_eq!(buffer.contents(), "(4, 0) -> 2 configurations\n");
    }

    #[test]
    fn collection_is_unsupported() {
        let mut runner = DryRunner::new(Box::new(io::sink()));

        assert!(matches!(
            runner.collect(0, 0),
            Err(RunnerError::Unsupported {
                operation: "collect",
                ..
            })
        ));
        assert!(matches!(
            runner.verify(0),
            Err(RunnerError::Unsupported { .. })
        ));
    }
}
