/*
 * Parseable Server (C) 2022 - 2024 Parseable, Inc.
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 *
 */

use std::future::Future;
use std::time::Instant;

use tokio::select;
use tokio::time::{interval_at, sleep, Duration, Interval, MissedTickBehavior};
use tracing::warn;

/// Ticker driving the sweep for batches past their max age.
///
/// The first tick fires one `period` from now. Ticks missed while a flush
/// was running are not replayed in a burst.
pub fn sweep_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Awaits `future`, logging a warning when it runs past `threshold`.
pub async fn monitor_task_duration<Fut, T>(task_name: &str, threshold: Duration, future: Fut) -> T
where
    Fut: Future<Output = T>,
{
    tokio::pin!(future);
    let mut warned_once = false;
    let start_time = Instant::now();

    loop {
        select! {
            _ = sleep(threshold), if !warned_once => {
                warn!(
                    "Task '{task_name}' started at: {start_time:?} is taking longer than expected: (threshold: {threshold:?})",
                );
                warned_once = true;
            },
            res = &mut future => {
                if warned_once {
                    warn!(
                        "Task '{task_name}' started at: {start_time:?} took longer than expected: {:?} (threshold: {threshold:?})",
                        start_time.elapsed()
                    );
                }
                break res;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticker_waits_a_full_period_first() {
        let mut ticker = sweep_ticker(Duration::from_secs(30));
        let start = tokio::time::Instant::now();

        ticker.tick().await;

        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_task_still_returns_its_output() {
        let output = monitor_task_duration("slow", Duration::from_millis(10), async {
            sleep(Duration::from_millis(50)).await;
            7
        })
        .await;

        assert_eq!(output, 7);
    }
}
