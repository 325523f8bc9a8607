/*!

This is the long-form manual for `trip_decision` and `packvote`.

## Rounds

A round is one group decision. It is opened over a fixed list of candidates
(destinations, each with an id, a label and an optional estimated cost) and a
roster of voters. While the round is open, each voter can:

* submit a ranking of candidates. The first entry is the favourite. Rankings
  may be partial but not empty, and may not repeat a candidate. Submitting
  again replaces the previous ballot.
* skip the round. Any previous ballot is dropped.
* withdraw, going back to "not voted".

The round owner can also reset a single voter, or the whole round.

The round is complete when every voter on the roster has either voted or
skipped. Completion is only informative: the round stays open until it is
finalized explicitly. Finalizing tallies the live ballots, stores the winner
and locks the round. A finalized round rejects every ballot change until it
is reset. A reset clears every ballot and the winner, and reopens voting.

## Tally rules

### `instantRunoff` (default)

Each ballot counts for its highest ranked candidate still in the race.

1. If a candidate has strictly more than half of the counted ballots, it wins.
   Exactly half is not enough.
2. Otherwise the candidate with the fewest votes is eliminated. If several are
   tied for the fewest votes, the one with the smallest id is eliminated.
   Ballots that rank no remaining candidate are exhausted and stop counting.
3. When a single candidate remains, it wins.

Every counted round is recorded in the trace: the vote counts, the candidates
still running at the start of the round, and either the eliminated candidate
or the winner.

There are never more counted rounds than candidates. Without ballots or
without candidates, there is no winner and no trace.

### `borda`

With `n` candidates, a candidate ranked at position `k` receives `n - k + 1`
points; unranked candidates receive none. The highest total wins. Equal
totals go to the candidate with the lowest cost, candidates without a cost
coming after the ones with a cost, and then to the smallest id. The trace has
a single round holding the points.

## Session files

`packvote --config session.json` replays a decision described in JSON:

```json
{
  "decision": { "name": "Summer trip", "date": "2026-06-01" },
  "candidates": [
    { "id": "A", "label": "Lisbon", "cost": 850.0 },
    { "id": "B", "label": "Kyoto" }
  ],
  "roster": ["ana", "ben", "cleo"],
  "rules": { "tallyPolicy": "instantRunoff" },
  "ballotSources": [
    {
      "provider": "xlsx",
      "filePath": "ballots.xlsx",
      "voterColumnIndex": 1,
      "firstChoiceColumnIndex": 2
    }
  ],
  "actions": [
    { "type": "submit", "voter": "ana", "ranking": ["A", "B"] },
    { "type": "skip", "voter": "ben" },
    { "type": "withdraw", "voter": "ben" },
    { "type": "resetVoter", "voter": "ana" },
    { "type": "finalize" },
    { "type": "reset" }
  ]
}
```

The `rules` section is optional. The `tallyPolicy` is `instantRunoff` or
`borda`.

### `xlsx` ballot sources

Ballots recorded in a spreadsheet (Excel .xlsx format), one voter per row.
The first row is a header and is ignored. Column indexes start at 1. The
voter column holds the voter id; the choices follow from
`firstChoiceColumnIndex` in order of preference. A choice may hold either the
id or the label of a candidate. The first empty cell ends the ranking. Rows
without a voter are ignored. Relative file paths are resolved against the
directory of the session file.

Spreadsheet ballots are submitted before the scripted actions.

### Output

The program prints a JSON summary with the completion status, the state of
each voter, the tally trace, the winner and the events emitted along the way.
With `--reference`, the summary is compared with a previously saved one and
the program fails on any difference. With `--out`, the summary is also
written to a file (`--out stdout` prints it without the `stats:` prefix).

*/
