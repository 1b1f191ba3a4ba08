//! The set of windows one run works against, with every declared field bound
//! to its window and the on-chip memory carved into its regions.
use std::{path::PathBuf, sync::Arc};

use ahash::AHashMap;
use log::{debug, info, warn};
use thiserror::Error;

use super::{
    device::{Device, DeviceError, Endianness, MmioWindow, RamMemory},
    register::{BoundField, FieldError, FieldPath},
};
use crate::config::{BoardConfig, LifecycleConfig};

pub type BoardResult<T> = Result<T, BoardError>;

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("unknown window '{0}'")]
    UnknownWindow(String),
    #[error("window '{window}' declares no field '{field}'")]
    UnknownField { window: String, field: String },
    #[error("window '{window}': {source}")]
    Field {
        window: String,
        #[source]
        source: FieldError,
    },
    #[error("{first} and {second} are driven by different contexts but share bits")]
    SharedOwnership { first: String, second: String },
    #[error("memory layout: {0}")]
    MemoryLayout(String),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("{} window(s) failed to unmap", .0.len())]
    Teardown(Vec<DeviceError>),
}

/// What the windows are backed by.
#[derive(Debug, Clone)]
pub enum Backend {
    /// Physical ranges mapped through the given memory device file.
    Physical(PathBuf),
    /// Heap memory standing in for every window.
    Simulated,
}

/// On-chip memory regions, as byte offsets into one window.
#[derive(Clone)]
pub struct MemoryLayout {
    pub window: Arc<dyn Device>,
    pub control_offset: usize,
    pub array_offset: usize,
    pub buffer_offset: usize,
}

pub struct Board {
    windows: AHashMap<String, Arc<dyn Device>>,
    fields: AHashMap<FieldPath, BoundField>,
    memory: MemoryLayout,
}

impl Board {
    /// Opens every window. A window that cannot be opened or mapped stays in
    /// its sentinel state and the board is still returned; only an
    /// inconsistent configuration is an error.
    pub fn establish(config: &BoardConfig, backend: &Backend) -> BoardResult<Self> {
        let mut windows: AHashMap<String, Arc<dyn Device>> = AHashMap::new();
        let mut fields = AHashMap::new();
        for (name, window_config) in &config.windows {
            let range = window_config.range();
            let window: Arc<dyn Device> = match backend {
                Backend::Physical(path) => Arc::new(MmioWindow::establish(name.as_str(), range, path)),
                Backend::Simulated => {
                    Arc::new(RamMemory::new(name.as_str(), range.len, Endianness::NATIVE).with_mode(range.mode))
                }
            };
            if !window.is_mapped() {
                warn!("window '{name}' unavailable; dependent fields will be skipped");
            }
            for (field_name, field_config) in &window_config.fields {
                let field = field_config.to_field(field_name);
                field.validate(range.len).map_err(|source| BoardError::Field {
                    window: name.clone(),
                    source,
                })?;
                let path = FieldPath {
                    window: name.clone(),
                    field: field_name.clone(),
                };
                fields.insert(path.clone(), BoundField::new(path.to_string(), window.clone(), field));
            }
            windows.insert(name.clone(), window);
        }

        let memory_window = windows
            .get(&config.memory.window)
            .cloned()
            .ok_or_else(|| BoardError::UnknownWindow(config.memory.window.clone()))?;
        let board = Self {
            windows,
            fields,
            memory: MemoryLayout {
                window: memory_window,
                control_offset: config.memory.control_offset,
                array_offset: config.memory.array_offset,
                buffer_offset: config.memory.buffer_offset,
            },
        };

        board.check_memory_layout(
            config.run.measurement_capacity,
            config.run.mapping.buffer_words,
        )?;
        let roles = &config.roles;
        board.check_disjoint(&[
            &roles.producer.output,
            &roles.consumer.output,
            &roles.mapping.indicator,
        ])?;
        for path in [&roles.producer.input, &roles.consumer.input]
            .into_iter()
            .chain(config.run.start.button.as_ref())
            .chain(config.lifecycle.startup_set.iter())
            .chain(config.lifecycle.startup_clear.iter())
            .chain(config.lifecycle.shutdown_clear.iter())
        {
            board.field(path)?;
        }
        info!(
            "board established: {} windows, {} fields",
            board.windows.len(),
            board.fields.len()
        );
        Ok(board)
    }

    pub fn window(&self, name: &str) -> BoardResult<&Arc<dyn Device>> {
        self.windows
            .get(name)
            .ok_or_else(|| BoardError::UnknownWindow(name.to_string()))
    }

    pub fn field(&self, path: &FieldPath) -> BoardResult<BoundField> {
        match self.fields.get(path) {
            Some(field) => Ok(field.clone()),
            None if self.windows.contains_key(&path.window) => Err(BoardError::UnknownField {
                window: path.window.clone(),
                field: path.field.clone(),
            }),
            None => Err(BoardError::UnknownWindow(path.window.clone())),
        }
    }

    pub fn memory(&self) -> &MemoryLayout {
        &self.memory
    }

    /// Control cell, measurement array and scratch buffer must appear in that
    /// order without overlap and fit inside the window.
    fn check_memory_layout(&self, capacity: usize, buffer_words: usize) -> BoardResult<()> {
        let layout = &self.memory;
        let len = layout.window.span().len();
        let regions = [
            ("control cell", layout.control_offset, Some(4)),
            ("measurement array", layout.array_offset, capacity.checked_mul(4)),
            ("mapping buffer", layout.buffer_offset, buffer_words.checked_mul(4)),
        ];
        let mut floor = 0usize;
        for (name, offset, size) in regions {
            if offset < floor {
                return Err(BoardError::MemoryLayout(format!(
                    "{name} at 0x{offset:X} overlaps the region before it (ends at 0x{floor:X})"
                )));
            }
            floor = match size.and_then(|size| offset.checked_add(size)) {
                Some(end) if end <= len => end,
                _ => {
                    return Err(BoardError::MemoryLayout(format!(
                        "{name} at 0x{offset:X} does not fit the {len} byte window '{}'",
                        layout.window.name()
                    )));
                }
            };
        }
        Ok(())
    }

    /// Fields driven by different contexts must not share a bit.
    fn check_disjoint(&self, outputs: &[&FieldPath]) -> BoardResult<()> {
        let bound = outputs
            .iter()
            .map(|path| self.field(path))
            .collect::<BoardResult<Vec<_>>>()?;
        for (idx, first) in bound.iter().enumerate() {
            for second in &bound[idx + 1..] {
                if first.window().name() == second.window().name() && first.field().overlaps(second.field()) {
                    return Err(BoardError::SharedOwnership {
                        first: first.label().to_string(),
                        second: second.label().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Direction and initial state writes done before any context starts.
    pub fn startup(&self, lifecycle: &LifecycleConfig) -> usize {
        self.apply(&lifecycle.startup_set, true) + self.apply(&lifecycle.startup_clear, false)
    }

    /// Switches indicators off after every context has joined.
    pub fn shutdown(&self, lifecycle: &LifecycleConfig) -> usize {
        self.apply(&lifecycle.shutdown_clear, false)
    }

    fn apply(&self, paths: &[FieldPath], on: bool) -> usize {
        let mut applied = 0;
        for path in paths {
            let written = self
                .field(path)
                .and_then(|field| field.drive(on).map_err(BoardError::from));
            match written {
                Ok(()) => {
                    applied += 1;
                    debug!("{path} {}", if on { "set" } else { "cleared" });
                }
                Err(err) => warn!("lifecycle write to {path} skipped: {err}"),
            }
        }
        applied
    }

    /// Unmaps every window, attempting all of them even after a failure.
    pub fn teardown(&self) -> BoardResult<()> {
        let mut names: Vec<&String> = self.windows.keys().collect();
        names.sort();
        let failures: Vec<DeviceError> = names
            .into_iter()
            .filter_map(|name| {
                info!("unmapping window '{name}'");
                self.windows[name].unmap().err()
            })
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(BoardError::Teardown(failures))
        }
    }
}
