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

use crate::driver::{LogLine, LogStream};
use chrono::Utc;
use tokio::sync::broadcast::{self, Receiver, Sender};

/// Normalized log line broadcast to consumers of one activation's output
/// (spec §6: `{time, stream, log}`).
#[derive(Clone, Debug)]
pub struct LogItem {
    pub channel: String,
    pub line: LogLine,
}

/// Channel between one log-generating entity (an activation, a container)
/// and any number of consumers (the log forwarder, an interactive tail).
#[derive(Clone, Debug)]
pub struct LogChannel {
    pub name: String,
    tx: Sender<LogItem>,
}

impl LogChannel {
    pub fn new(name: String) -> LogChannel {
        let (tx, _) = broadcast::channel(40);
        LogChannel { name, tx }
    }

    pub fn subscribe(&self) -> Receiver<LogItem> {
        self.tx.subscribe()
    }

    /// Sends a stdout line to the channel. Ignores the "no receivers" error
    /// the same way the driver ignores a dropped sentinel: emission must
    /// never affect correctness.
    pub fn send_stdout(&self, text: String) {
        self.send(LogStream::Stdout, text);
    }

    pub fn send_stderr(&self, text: String) {
        self.send(LogStream::Stderr, text);
    }

    fn send(&self, stream: LogStream, text: String) {
        let _ = self.tx.send(LogItem {
            channel: self.name.clone(),
            line: LogLine { time: Utc::now(), stream, text },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcasts_in_order_to_a_subscriber() {
        let channel = LogChannel::new("activation-1".into());
        let mut rx = channel.subscribe();

        channel.send_stdout("hello".into());
        channel.send_stdout("world".into());

        let first = rx.recv().await.expect("first line");
        assert_eq!(first.line.text, "hello");
        let second = rx.recv().await.expect("second line");
        assert_eq!(second.line.text, "world");
    }
}
