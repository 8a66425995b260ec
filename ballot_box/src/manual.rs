/*!

This is the long-form manual for `ballot_box` and `votectl`.

## Configuration

An election is described by one JSON file. Only `roster` and `adminSecret` are
required; the other keys fall back to the defaults shown here.

```json
{
  "title": "Vote: Who do you want to work with the most?",
  "database": "votes.db",
  "adminSecret": "change me",
  "roster": ["Anna", "Bob", "Clara", "Dan"],
  "maxChoices": 3,
  "showTopN": 5,
  "forbiddenCandidate": "Dan",
  "excludeSelf": true
}
```

* `database` is resolved relative to the configuration file.
* `forbiddenCandidate` names a roster member nobody may vote for.
* `excludeSelf` stops voters from picking their own name.
* Adding a `tokens` list turns the election into a token election: voters type one
  of the codes instead of their name, and each code works once.

## Commands

```bash
votectl --config election.json init
votectl --config election.json options --voter Anna
votectl --config election.json vote --voter Anna Bob Clara
votectl --config election.json vote --token K7Q2 Bob
votectl --config election.json results --password 'change me' --json
votectl --config election.json reset --password 'change me' --confirm
```

`RUST_LOG` controls the log output, and `--verbose` turns on debug messages.

## Ballot rules

A ballot is checked in this order and the first failure is reported:

1. at least one person selected
2. no more than `maxChoices` people (the ballot is refused, never cut short)
3. nobody selected twice
4. everybody selected is on the roster
5. the forbidden name is not selected
6. the voter did not select themselves (with `excludeSelf`)
7. the voter is on the roster, or the code is one of the `tokens`
8. the voter or code has not voted yet

## Storage

The ballots live in a SQLite file with three tables: `votes` (one row per
selected person), `participants` (one row per named voter) and `used_tokens`
(one row per consumed code). A ballot is written in a single transaction, so
two simultaneous submissions for the same voter record exactly one ballot.

`init` creates the tables or migrates a file written by an older version in
place. Older files of token elections, whose `votes` table has a `token`
column instead of `voter`, are migrated the same way. A `votes` table missing
`id`, `candidate`, `created_at`, or both of `voter` and `token`, is refused.
`init --repair-schema` drops such a table and starts over empty, which **loses
every recorded vote** and makes every used code valid again.

Voter names and codes given on the command line are trimmed.

A reset deletes every ballot and frees every code.

*/
