// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Transport module
//
// Provides a trait-based abstraction over how upload batches reach the
// collector, allowing the engine to POST over HTTP, drop batches into a
// directory, or use an embedder-supplied implementation.

pub mod backend;
pub mod factory;
pub mod filesystem;
pub mod http;

pub use backend::Transport;
pub use factory::TransportFactory;
pub use filesystem::FilesystemTransport;
pub use http::HttpTransport;
