/*
 * transport.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Chiacchiera, a cross-platform messenger plugin.
 *
 * Chiacchiera is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Chiacchiera is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Chiacchiera.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Transport seam between the connection state machine and real sockets.
//!
//! The connection never performs I/O itself; it issues commands through [`Transport`] and
//! is told about results through its `on_*` event methods. [`IoQueue`] records commands
//! for a driver (the tokio pipeline task, or a test) to carry out.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::uri::Endpoint;

pub trait Transport {
    /// Open a connection (TCP, then TLS) to `endpoint`. Completion is reported with
    /// `on_connected` or `on_error`.
    fn connect(&mut self, endpoint: &Endpoint);

    /// Write `data` in full. Completion is reported with `on_write_complete` or `on_error`.
    fn write(&mut self, data: Bytes);

    /// Close the current socket, if any. No event follows.
    fn close(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoCommand {
    Connect(Endpoint),
    Write(Bytes),
    Close,
}

/// Transport that records commands in order.
#[derive(Debug, Default)]
pub struct IoQueue {
    commands: VecDeque<IoCommand>,
}

impl IoQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&mut self) -> Option<IoCommand> {
        self.commands.pop_front()
    }

    pub fn drain(&mut self) -> Vec<IoCommand> {
        self.commands.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl Transport for IoQueue {
    fn connect(&mut self, endpoint: &Endpoint) {
        self.commands.push_back(IoCommand::Connect(endpoint.clone()));
    }

    fn write(&mut self, data: Bytes) {
        self.commands.push_back(IoCommand::Write(data));
    }

    fn close(&mut self) {
        self.commands.push_back(IoCommand::Close);
    }
}
