// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! RPM repository metadata formats.

RPM repositories define metadata via a series of files indexed by `repomd.xml`. This
module reads and writes each of them.
*/

pub mod assemble;
pub mod comps;
pub mod filelists;
pub mod modules;
pub mod other;
pub mod primary;
pub mod repomd;
pub mod treeinfo;
pub mod updateinfo;
pub mod xml;
