// Copyright 2020 LEXUGE
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Drop to an unprivileged user after the listening socket is bound, ported
//! from `runas.cc`'s `RunAs`. `setgid` before `setuid`, same order as the
//! original (a process can't change its group once it has given up its
//! user).

#[cfg(unix)]
use nix::unistd::{self, User};

#[cfg(unix)]
pub fn drop_to(user: &str) -> anyhow::Result<()> {
    let account = User::from_name(user)?
        .ok_or_else(|| anyhow::anyhow!("run-as user '{user}' could not be found"))?;

    unistd::setgid(account.gid)?;
    unistd::initgroups(&std::ffi::CString::new(account.name.as_str())?, account.gid)?;
    unistd::setuid(account.uid)?;

    Ok(())
}

#[cfg(not(unix))]
pub fn drop_to(_user: &str) -> anyhow::Result<()> {
    anyhow::bail!("privilege dropping is only supported on unix")
}
