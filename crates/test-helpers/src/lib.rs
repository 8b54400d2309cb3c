/* -------------------------------------------------------------------------- *\
 *   Licensed under the Apache License, Version 2.0 (the "License");          *
 *   you may not use this file except in compliance with the License.        *
 *   You may obtain a copy of the License at                                 *
 *                                                                            *
 *       http://www.apache.org/licenses/LICENSE-2.0                          *
 *                                                                            *
 *   Unless required by applicable law or agreed to in writing, software     *
 *   distributed under the License is distributed on an "AS IS" BASIS,       *
 *   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.*
 *   See the License for the specific language governing permissions and     *
 *   limitations under the License.                                          *
\* -------------------------------------------------------------------------- */

#![warn(clippy::unwrap_used)]

/// Polls `$left == $right` until it holds or a timeout elapses. Useful for
/// asserting on state that converges asynchronously (an eviction, a pause)
/// instead of racing a single assertion against it.
#[macro_export]
macro_rules! assert_eventually_eq {
    ($left: expr, $right: expr $(,)?) => {
        assert_eventually_eq!($left, $right, Duration::from_millis(200), Duration::from_millis(10));
    };
    ($left: expr, $right: expr, $timeout: expr $(,)?) => {
        assert_eventually_eq!($left, $right, $timeout, Duration::from_millis(10));
    };
    ($left: expr, $right: expr, $timeout: expr, $poll_interval: expr $(,)?) => {
        let start = ::std::time::Instant::now();
        let timeout = $timeout;
        let poll_interval = $poll_interval;
        while !($left == $right) {
            ::tokio::time::sleep(poll_interval).await;
            let now = ::std::time::Instant::now();
            if now.duration_since(start) > timeout {
                ::core::panic!("assertion failed: `(left == right)`\nleft: {:#?}\nright: {:#?}", $left, $right);
            }
        }
    };
}

pub mod mock_time {
    use once_cell::sync::OnceCell;
    use std::sync::Mutex;
    use std::time::{Duration, SystemTime};

    pub static TIME: OnceCell<Mutex<SystemTime>> = OnceCell::new();

    pub fn now() -> SystemTime {
        *TIME
            .get_or_init(|| Mutex::new(SystemTime::UNIX_EPOCH))
            .lock()
            .expect("mock_time failed to initialize the system time")
    }

    pub fn advance_time(d: Duration) {
        let mut guard = TIME
            .get_or_init(|| Mutex::new(SystemTime::UNIX_EPOCH))
            .lock()
            .expect("mock_time failed to get the system time");
        *guard = guard
            .checked_add(d)
            .expect("mock_time failed to advance the system time");
    }

    pub fn reset() {
        let mut guard = TIME
            .get_or_init(|| Mutex::new(SystemTime::UNIX_EPOCH))
            .lock()
            .expect("mock_time failed to reset the system time");
        *guard = SystemTime::UNIX_EPOCH;
    }
}